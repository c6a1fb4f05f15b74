//! Error types for mig-deploy

use mig_db::DbError;
use thiserror::Error;

/// Schema deployment errors
#[derive(Error, Debug)]
pub enum DeployError {
    /// X001: Live catalog could not be read
    #[error("[X001] Failed to read database catalog: {0}")]
    Catalog(String),

    /// X002: Deployment would lose data and the policy forbids it
    #[error("[X002] Deployment blocked, possible data loss: {objects}")]
    DataLoss { objects: String },

    /// X003: Dependent objects block a change and may not be dropped
    #[error("[X003] Deployment blocked by dependent objects: {objects}")]
    BlockingObjects { objects: String },

    /// X004: New NOT NULL column on a non-empty table has no usable default
    #[error("[X004] Column {column} is NOT NULL without a default on a non-empty table: {detail}")]
    MissingDefault { column: String, detail: String },

    /// X005: Change the engine cannot apply in place
    #[error("[X005] Unsupported change: {0}")]
    Unsupported(String),

    /// X006: A deployment statement failed; the deployment was rolled back
    #[error("[X006] {action} failed: {message}")]
    Apply { action: String, message: String },

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Result type alias for DeployError
pub type DeployResult<T> = Result<T, DeployError>;
