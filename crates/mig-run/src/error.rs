//! Error types for mig-run

use mig_core::CoreError;
use thiserror::Error;

/// Errors that stop a run. Step failures are not errors; they are recorded
/// as `StepResult::Failed` and the run goes on per the failure policy.
#[derive(Error, Debug)]
pub enum RunError {
    /// Plan or artifact problem found while materializing steps
    #[error(transparent)]
    Config(CoreError),

    /// An outcome could not be durably recorded
    #[error(transparent)]
    LedgerWrite(CoreError),

    /// Prior outcomes could not be read for resume
    #[error(transparent)]
    LedgerRead(CoreError),

    /// R001: A lane task panicked or was aborted
    #[error("[R001] Internal run error: {0}")]
    Internal(String),
}

/// Result type alias for RunError
pub type RunResult<T> = Result<T, RunError>;
