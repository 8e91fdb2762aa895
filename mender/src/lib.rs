//! Sandboxed run, diagnose and repair for submitted Python programs.
//!
//! A submission is vetted against a [`CapabilityPolicy`](core::policy::CapabilityPolicy),
//! run in a throwaway interpreter process with time and memory ceilings, and on
//! failure the interpreter's diagnostics are classified and turned into a patch
//! candidate. [`looping::run_repair`] repeats that cycle within a fixed budget.
//!
//! - **[`core`]**: Pure, deterministic logic (policy validation, classification,
//!   patch strategies, diffs). No I/O.
//! - **[`io`]**: Side-effecting pieces (interpreter processes, config files,
//!   the reasoning collaborator, audit logs).
//!
//! [`submission`] and [`looping`] sit on top and are what the CLI and the HTTP
//! server call.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod submission;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
