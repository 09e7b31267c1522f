//! Stable exit codes for orca CLI commands.

/// Command succeeded; for `orca run`, the orchestrator finished.
pub const OK: i32 = 0;
/// Command failed due to invalid config, arguments or other errors.
pub const INVALID: i32 = 1;
/// `orca run` stopped without a `finish` action (turns, time or context ran out).
pub const INCOMPLETE: i32 = 2;
