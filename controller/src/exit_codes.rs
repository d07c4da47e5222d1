//! Stable exit codes for controller CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Config, task or log input was missing or invalid.
pub const INVALID: i32 = 1;
