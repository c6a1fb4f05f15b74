//! Append-only execution ledger.
//!
//! One JSON object per line. Every append is flushed and synced before it
//! returns, so the file reflects true progress even if the process dies
//! mid-phase. Writers share one ledger through a mutex, which keeps lines
//! whole and in write order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::names::{DatabaseName, StepId};
use crate::plan::PhaseKind;
use crate::result::StepResult;

/// Record of one attempted (or deliberately skipped) step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Run that wrote this entry
    pub run_id: String,

    /// Fingerprint of the plan the run executed
    pub plan_hash: String,

    pub step_id: StepId,
    pub phase: PhaseKind,
    pub database: DatabaseName,

    /// Artifact path relative to the plan directory
    pub artifact: String,

    pub outcome: StepResult,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Generate an identifier for a new run
pub fn new_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Durable, append-only ledger backed by a JSON-lines file
#[derive(Debug)]
pub struct ExecutionLedger {
    path: PathBuf,
    file: Mutex<File>,
}

impl ExecutionLedger {
    /// Open (creating if needed) the ledger at `path`.
    ///
    /// A trailing partial line left by an abnormal termination is terminated
    /// so that new entries start on a fresh line.
    pub fn open(path: &Path) -> CoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| write_error(path, e))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(|e| write_error(path, e))?;

        let len = file.metadata().map_err(|e| write_error(path, e))?.len();
        if len > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::End(-1))
                .and_then(|_| file.read_exact(&mut last))
                .map_err(|e| write_error(path, e))?;
            if last[0] != b'\n' {
                log::warn!(
                    "Ledger {} ends with a partial entry; it will be ignored",
                    path.display()
                );
                file.write_all(b"\n")
                    .and_then(|_| file.sync_data())
                    .map_err(|e| write_error(path, e))?;
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Append one entry; durable when this returns `Ok`
    pub fn append(&self, entry: &LedgerEntry) -> CoreResult<()> {
        let mut line = serde_json::to_string(entry).map_err(|e| CoreError::LedgerWrite {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;
        line.push('\n');

        let mut file = self.file.lock().unwrap_or_else(|p| p.into_inner());
        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .and_then(|_| file.sync_data())
            .map_err(|e| write_error(&self.path, e))
    }

    /// Every readable entry, in write order
    pub fn entries(&self) -> CoreResult<Vec<LedgerEntry>> {
        // Hold the writer lock so a concurrent append is never read half-written
        let _guard = self.file.lock().unwrap_or_else(|p| p.into_inner());
        let content = fs::read_to_string(&self.path).map_err(|e| CoreError::LedgerRead {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;

        let mut entries = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LedgerEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => log::warn!(
                    "Skipping unreadable ledger line {} in {}: {}",
                    idx + 1,
                    self.path.display(),
                    e
                ),
            }
        }
        Ok(entries)
    }

    /// Entries written by `run_id`, ordered by write time
    pub fn entries_for(&self, run_id: &str) -> CoreResult<Vec<LedgerEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.run_id == run_id)
            .collect())
    }

    /// Steps that succeeded under `plan_hash`, mapped to the run that did it.
    ///
    /// Any success counts, even if a later run recorded the same step as
    /// skipped: a resumed run skips exactly these steps.
    pub fn succeeded_steps(&self, plan_hash: &str) -> CoreResult<HashMap<StepId, String>> {
        let mut succeeded = HashMap::new();
        for entry in self.entries()? {
            if entry.plan_hash == plan_hash && entry.outcome.is_succeeded() {
                succeeded.entry(entry.step_id).or_insert(entry.run_id);
            }
        }
        Ok(succeeded)
    }
}

fn write_error(path: &Path, e: std::io::Error) -> CoreError {
    CoreError::LedgerWrite {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

#[cfg(test)]
#[path = "ledger_test.rs"]
mod tests;
