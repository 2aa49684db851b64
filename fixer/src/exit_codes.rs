//! Stable exit codes for fixer CLI commands.

/// Run finished with `status = success`, or the command succeeded.
pub const OK: i32 = 0;
/// Run finished with `status = error`, or the command itself failed.
pub const ERROR: i32 = 1;
/// Run finished with `status = partial` (incomplete but not failed).
pub const PARTIAL: i32 = 2;
