//! Error types for mig-core

use thiserror::Error;

/// Core error type for mig
#[derive(Error, Debug)]
pub enum CoreError {
    /// E001: Plan file not found
    #[error("[E001] Plan file not found: {path}")]
    PlanNotFound { path: String },

    /// E002: Failed to parse the plan file
    #[error("[E002] Failed to parse plan {path}: {message}")]
    PlanParseError { path: String, message: String },

    /// E003: Invalid plan value
    #[error("[E003] Invalid plan: {message}")]
    PlanInvalid { message: String },

    /// E004: A declared script or package directory does not exist
    #[error("[E004] Directory declared in {phase} not found: {path}")]
    DirectoryNotFound { phase: String, path: String },

    /// E005: A declared artifact could not be read
    #[error("[E005] Failed to read artifact '{path}': {source}")]
    ArtifactUnreadable {
        path: String,
        source: std::io::Error,
    },

    /// E006: Schema package could not be parsed or is inconsistent
    #[error("[E006] Invalid schema package '{path}': {message}")]
    PackageInvalid { path: String, message: String },

    /// L001: Ledger entry could not be durably written
    #[error("[L001] Failed to write execution ledger '{path}': {message}")]
    LedgerWrite { path: String, message: String },

    /// L002: Ledger could not be read back
    #[error("[L002] Failed to read execution ledger '{path}': {message}")]
    LedgerRead { path: String, message: String },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for CoreError
pub type CoreResult<T> = Result<T, CoreError>;
