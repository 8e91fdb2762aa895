//! Stable exit codes for mender CLI commands.

/// Command succeeded: program allowed, run succeeded, or session fixed.
pub const OK: i32 = 0;
/// Invalid usage, unreadable input, bad config or rejected submission limits.
pub const INVALID: i32 = 1;
/// The capability policy rejected the program.
pub const REJECTED: i32 = 2;
/// The program failed to run cleanly, or the repair session was exhausted.
pub const FAILED: i32 = 3;
