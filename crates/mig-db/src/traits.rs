//! Script execution trait definition

use crate::error::DbResult;
use async_trait::async_trait;
use mig_core::TargetDatabase;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Bounds on one unit of database work
#[derive(Debug, Clone)]
pub struct ExecLimits {
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl ExecLimits {
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }
}

/// Runs SQL scripts against a target database.
///
/// Implementations must be Send + Sync for async operation. The connection
/// used for a call must be released before the call returns, whatever the
/// outcome.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    /// Execute the full script text as one batch
    async fn execute_script(
        &self,
        target: &TargetDatabase,
        sql: &str,
        limits: &ExecLimits,
    ) -> DbResult<()>;

    /// Engine identifier for logging
    fn engine(&self) -> &'static str;
}
