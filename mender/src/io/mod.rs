//! Side-effecting pieces of the repair pipeline: processes, files, network.

pub mod advisor;
pub mod config;
pub mod executor;
pub mod process;
pub mod prompt;
pub mod session_log;
