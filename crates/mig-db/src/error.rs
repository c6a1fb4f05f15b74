//! Error types for mig-db

use std::time::Duration;
use thiserror::Error;

/// Database operation errors
#[derive(Error, Debug)]
pub enum DbError {
    /// Connection error (D001)
    #[error("[D001] Database connection failed: {0}")]
    ConnectionError(String),

    /// Statement execution error (D002)
    #[error("[D002] SQL execution failed: {0}")]
    ExecutionError(String),

    /// Execution exceeded its time limit (D003)
    #[error("[D003] timeout after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Execution stopped by a cancellation request (D004)
    #[error("[D004] cancelled")]
    Cancelled,

    /// Internal error (D005)
    #[error("[D005] Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Timeouts and cancellations stop a step without the SQL itself failing
    pub fn is_interruption(&self) -> bool {
        matches!(self, DbError::Timeout(_) | DbError::Cancelled)
    }
}

/// Result type alias for DbError
pub type DbResult<T> = Result<T, DbError>;

impl From<duckdb::Error> for DbError {
    fn from(err: duckdb::Error) -> Self {
        DbError::ExecutionError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for DbError {
    fn from(err: tokio::task::JoinError) -> Self {
        DbError::Internal(format!("database worker failed: {}", err))
    }
}
