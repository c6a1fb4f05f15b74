//! Outcome of executing one step.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of one step. Immutable once recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum StepResult {
    Succeeded,
    Failed(String),
    Skipped(String),
}

impl StepResult {
    pub fn failed(reason: impl Into<String>) -> Self {
        StepResult::Failed(reason.into())
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        StepResult::Skipped(reason.into())
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, StepResult::Succeeded)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepResult::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, StepResult::Skipped(_))
    }

    /// Failure or skip reason, if any
    pub fn reason(&self) -> Option<&str> {
        match self {
            StepResult::Succeeded => None,
            StepResult::Failed(r) | StepResult::Skipped(r) => Some(r),
        }
    }
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepResult::Succeeded => write!(f, "succeeded"),
            StepResult::Failed(r) => write!(f, "failed: {}", r),
            StepResult::Skipped(r) => write!(f, "skipped: {}", r),
        }
    }
}
