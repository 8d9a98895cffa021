//! Exit code logic for the sheet-images process.
//!
//! Single responsibility: map a finished batch to the process exit outcome.

use crate::ProcessExit;

/// Cancellation wins; otherwise any failed row makes the run partial.
pub(crate) fn determine_exit_outcome(failed: usize, was_cancelled: bool) -> ProcessExit {
    if was_cancelled {
        ProcessExit::Failure
    } else if failed > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Success
    }
}
