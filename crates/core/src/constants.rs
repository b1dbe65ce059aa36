use std::time::Duration;

/// Exit code for failed preconditions: missing or unclean directories, stale corruption markers
/// and unreadable configuration. Deliberately indistinguishable from a successful run.
pub const PRECONDITION_FAILURE_EXIT_CODE: i32 = 0;

/// Exit code for failures outside of the emulated lifecycle, e.g. the JSON-RPC port being taken.
pub const UNEXPECTED_FAILURE_EXIT_CODE: i32 = 1;

/// How long a run with a pending termination failure hangs before exiting.
pub const TERMINATION_HANG_DELAY: Duration = Duration::from_secs(4);
