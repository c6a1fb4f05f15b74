//! Shared command plumbing

use std::fmt;

/// Exit status when every step succeeded
pub(crate) const EXIT_OK: u8 = 0;

/// A step failed, or the run was aborted or cancelled
pub(crate) const EXIT_RUN_FAILED: u8 = 1;

/// The plan, an artifact, or the ledger could not be used
pub(crate) const EXIT_CONFIG: u8 = 2;

/// Error type representing a non-zero process exit code.
///
/// Returned instead of calling `std::process::exit` so destructors run and
/// the log file is flushed.
#[derive(Debug)]
pub(crate) struct ExitCode(pub(crate) u8);

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // control flow only; the cause was already logged
        write!(f, "")
    }
}

impl std::error::Error for ExitCode {}
