//! Deterministic, pure logic shared by the repair pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod diff;
pub mod extract;
pub mod patch;
pub mod policy;
pub mod source;
pub mod types;
pub mod validator;
