//! Stable exit codes for crucible CLI commands.

/// Command succeeded; `crucible run` also uses it when the pipeline completes.
pub const OK: i32 = 0;
/// Command failed: invalid layout/config/state, agent failure, or other errors.
pub const ERROR: i32 = 1;
/// `crucible next` found every milestone completed.
pub const COMPLETE: i32 = 2;
/// `crucible run` stopped before completion (step limit or dry run).
pub const STOPPED: i32 = 3;
