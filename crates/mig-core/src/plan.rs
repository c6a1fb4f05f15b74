//! Validated, immutable migration plan.
//!
//! A [`MigrationPlan`] is built once from a [`PlanConfig`] and then passed
//! explicitly to whoever needs it. Validation happens here so that a bad plan
//! fails before any step runs.

use crate::checksum::compute_checksum;
use crate::config::{FailurePolicy, PlanConfig, ScriptsEntryConfig};
use crate::error::{CoreError, CoreResult};
use crate::policy::DeploymentPolicy;
use crate::target::TargetDatabase;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The three phases of a migration, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    PreScripts,
    PackageDeployments,
    PostScripts,
}

impl PhaseKind {
    /// All phases in the order they run
    pub const ALL: [PhaseKind; 3] = [
        PhaseKind::PreScripts,
        PhaseKind::PackageDeployments,
        PhaseKind::PostScripts,
    ];

    /// Plan-file section name, also used as the first segment of step ids
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseKind::PreScripts => "pre_scripts",
            PhaseKind::PackageDeployments => "schema_packages",
            PhaseKind::PostScripts => "post_scripts",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared entry of a phase.
///
/// `connection` is the index into the plan's connection strings. It is part
/// of every step identity, so the same script run on two servers is two steps.
#[derive(Debug, Clone)]
pub enum PhaseEntry {
    /// Script directories run against a single database
    Scripts {
        connection: usize,
        target: TargetDatabase,
        directories: Vec<PathBuf>,
    },
    /// A directory of packages; each file targets the database named by its stem
    Packages {
        connection: usize,
        server: PathBuf,
        directory: PathBuf,
    },
}

/// Named, ordered sequence of entries
#[derive(Debug, Clone)]
pub struct Phase {
    pub kind: PhaseKind,
    pub entries: Vec<PhaseEntry>,
}

impl Phase {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Application identity reported at run start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppIdentity {
    pub name: String,
    pub version: String,
}

/// Validated execution settings
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub failure_policy: FailurePolicy,
    pub concurrency: usize,
    pub script_timeout: Duration,
    pub deploy_timeout: Duration,
    pub ledger_path: PathBuf,
    pub log_dir: PathBuf,
}

/// Ordered, immutable migration plan
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub app: AppIdentity,
    /// Directory relative paths were resolved against
    pub base_dir: PathBuf,
    phases: [Phase; 3],
    pub settings: RunSettings,
    pub policy: DeploymentPolicy,
    /// Fingerprint of everything that determines what steps do
    pub plan_hash: String,
}

impl MigrationPlan {
    /// Load and validate the plan file at `path`.
    ///
    /// Relative paths in the file resolve against the file's directory.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let config = PlanConfig::load(path)?;
        let base_dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self::from_config(config, &base_dir)
    }

    /// Validate a parsed plan document
    pub fn from_config(config: PlanConfig, base_dir: &Path) -> CoreResult<Self> {
        if config.connection_strings.is_empty() {
            return Err(invalid("connection_strings must list at least one server"));
        }
        if config.settings.concurrency == 0 {
            return Err(invalid("settings.concurrency must be at least 1"));
        }
        if config.settings.script_timeout_secs == 0 || config.settings.deploy_timeout_secs == 0 {
            return Err(invalid("settings timeouts must be greater than zero"));
        }
        if config.version.app_name.trim().is_empty() {
            return Err(invalid("version.app_name must not be empty"));
        }

        let servers: Vec<PathBuf> = config
            .connection_strings
            .iter()
            .map(|s| resolve(base_dir, s))
            .collect();

        let pre = Phase {
            kind: PhaseKind::PreScripts,
            entries: script_entries(PhaseKind::PreScripts, &config.pre_scripts, &servers, base_dir)?,
        };

        let mut package_entries = Vec::with_capacity(config.schema_packages.len());
        let mut seen = HashSet::new();
        for entry in &config.schema_packages {
            let phase = PhaseKind::PackageDeployments;
            let connection = entry.connection();
            let server = server_for(&servers, connection, phase)?;
            let directory = existing_dir(phase, base_dir, entry.directory())?;
            if !seen.insert((same_path(&server), same_path(&directory))) {
                return Err(invalid(format!(
                    "{}: '{}' is listed more than once for connection {}",
                    phase,
                    entry.directory(),
                    connection
                )));
            }
            package_entries.push(PhaseEntry::Packages {
                connection,
                server,
                directory,
            });
        }
        let packages = Phase {
            kind: PhaseKind::PackageDeployments,
            entries: package_entries,
        };

        let post = Phase {
            kind: PhaseKind::PostScripts,
            entries: script_entries(PhaseKind::PostScripts, &config.post_scripts, &servers, base_dir)?,
        };

        let plan_hash = compute_checksum(&config.fingerprint_source()?);

        let settings = RunSettings {
            failure_policy: config.settings.failure_policy,
            concurrency: config.settings.concurrency,
            script_timeout: Duration::from_secs(config.settings.script_timeout_secs),
            deploy_timeout: Duration::from_secs(config.settings.deploy_timeout_secs),
            ledger_path: resolve(base_dir, &config.settings.ledger_path),
            log_dir: resolve(base_dir, &config.settings.log_dir),
        };

        Ok(Self {
            app: AppIdentity {
                name: config.version.app_name,
                version: config.version.version,
            },
            base_dir: base_dir.to_path_buf(),
            phases: [pre, packages, post],
            settings,
            policy: config.deployment_policy,
            plan_hash,
        })
    }

    pub fn phase(&self, kind: PhaseKind) -> &Phase {
        match kind {
            PhaseKind::PreScripts => &self.phases[0],
            PhaseKind::PackageDeployments => &self.phases[1],
            PhaseKind::PostScripts => &self.phases[2],
        }
    }

    /// Path of an artifact relative to the plan directory, `/`-separated
    pub fn relative_artifact(&self, artifact: &Path) -> String {
        let rel = artifact.strip_prefix(&self.base_dir).unwrap_or(artifact);
        rel.to_string_lossy().replace('\\', "/")
    }
}

fn invalid(message: impl Into<String>) -> CoreError {
    CoreError::PlanInvalid {
        message: message.into(),
    }
}

fn resolve(base_dir: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn server_for(servers: &[PathBuf], index: usize, phase: PhaseKind) -> CoreResult<PathBuf> {
    servers.get(index).cloned().ok_or_else(|| {
        invalid(format!(
            "{} refers to connection {} but only {} connection string(s) are declared",
            phase,
            index,
            servers.len()
        ))
    })
}

/// Comparable form of a path; `a/./b` and `a/b` are the same directory
fn same_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn existing_dir(phase: PhaseKind, base_dir: &Path, raw: &str) -> CoreResult<PathBuf> {
    let dir = resolve(base_dir, raw);
    if !dir.is_dir() {
        return Err(CoreError::DirectoryNotFound {
            phase: phase.to_string(),
            path: dir.display().to_string(),
        });
    }
    Ok(dir)
}

fn script_entries(
    phase: PhaseKind,
    entries: &[ScriptsEntryConfig],
    servers: &[PathBuf],
    base_dir: &Path,
) -> CoreResult<Vec<PhaseEntry>> {
    let mut out = Vec::with_capacity(entries.len());
    let mut seen = HashSet::new();
    for entry in entries {
        if !entry.database.is_valid_file_stem() {
            return Err(invalid(format!(
                "{}: '{}' is not a valid database name",
                phase, entry.database
            )));
        }
        if entry.directories.is_empty() {
            return Err(invalid(format!(
                "{}: database '{}' lists no directories",
                phase, entry.database
            )));
        }
        let server = server_for(servers, entry.connection, phase)?;
        let directories = entry
            .directories
            .iter()
            .map(|d| existing_dir(phase, base_dir, d))
            .collect::<CoreResult<Vec<_>>>()?;
        for (raw, dir) in entry.directories.iter().zip(&directories) {
            // the same file on the same target would be two steps with one identity
            if !seen.insert((same_path(&server), entry.database.clone(), same_path(dir))) {
                return Err(invalid(format!(
                    "{}: '{}' is listed more than once for database '{}' on connection {}",
                    phase, raw, entry.database, entry.connection
                )));
            }
        }
        out.push(PhaseEntry::Scripts {
            connection: entry.connection,
            target: TargetDatabase::new(server, entry.database.clone()),
            directories,
        });
    }
    Ok(out)
}

#[cfg(test)]
#[path = "plan_test.rs"]
mod tests;
