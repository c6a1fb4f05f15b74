//! Plan file types and parsing for Migration.yml

use crate::error::{CoreError, CoreResult};
use crate::names::DatabaseName;
use crate::policy::DeploymentPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Default plan file name looked up in the working directory
pub const DEFAULT_PLAN_FILE: &str = "Migration.yml";

/// Raw plan document as written by the user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanConfig {
    /// Application identity logged at run start
    pub version: VersionConfig,

    /// Servers (directories of database files). Entries refer to them by index.
    pub connection_strings: Vec<String>,

    /// Scripts run before any package is deployed
    #[serde(default)]
    pub pre_scripts: Vec<ScriptsEntryConfig>,

    /// Directories of schema packages, one package per database
    #[serde(default, alias = "dac_pacs")]
    pub schema_packages: Vec<PackagesEntryConfig>,

    /// Scripts run after every package has been deployed
    #[serde(default)]
    pub post_scripts: Vec<ScriptsEntryConfig>,

    /// Execution settings
    #[serde(default)]
    pub settings: SettingsConfig,

    /// Policy applied to every package deployment
    #[serde(default)]
    pub deployment_policy: DeploymentPolicy,
}

/// Application name and version
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VersionConfig {
    pub app_name: String,
    pub version: String,
}

/// One database's script directories within a script phase
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptsEntryConfig {
    /// Database the scripts run against
    pub database: DatabaseName,

    /// Index into `connection_strings`
    #[serde(default)]
    pub connection: usize,

    /// Directories of `.sql` files, run in the order listed
    pub directories: Vec<String>,
}

/// A schema package directory, either bare or with an explicit connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PackagesEntryConfig {
    Directory(String),
    Detailed(PackagesDirectoryConfig),
}

/// Schema package directory with an explicit connection index
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackagesDirectoryConfig {
    pub directory: String,
    #[serde(default)]
    pub connection: usize,
}

impl PackagesEntryConfig {
    pub fn directory(&self) -> &str {
        match self {
            PackagesEntryConfig::Directory(d) => d,
            PackagesEntryConfig::Detailed(d) => &d.directory,
        }
    }

    pub fn connection(&self) -> usize {
        match self {
            PackagesEntryConfig::Directory(_) => 0,
            PackagesEntryConfig::Detailed(d) => d.connection,
        }
    }
}

/// What the orchestrator does after a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Record the failure and keep going
    #[default]
    ContinueAndReport,
    /// Stop the run at the first failed step
    AbortOnFirstFailure,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::ContinueAndReport => write!(f, "continue-and-report"),
            FailurePolicy::AbortOnFirstFailure => write!(f, "abort-on-first-failure"),
        }
    }
}

/// Execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsConfig {
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Maximum number of steps executing at once (across databases)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-script timeout in seconds
    #[serde(default = "default_script_timeout_secs")]
    pub script_timeout_secs: u64,

    /// Per-package deployment timeout in seconds
    #[serde(default = "default_deploy_timeout_secs")]
    pub deploy_timeout_secs: u64,

    /// Append-only execution ledger (JSON lines)
    #[serde(default = "default_ledger_path")]
    pub ledger_path: String,

    /// Directory receiving the daily MigrationLog-YYYYMMDD.log file
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            concurrency: default_concurrency(),
            script_timeout_secs: default_script_timeout_secs(),
            deploy_timeout_secs: default_deploy_timeout_secs(),
            ledger_path: default_ledger_path(),
            log_dir: default_log_dir(),
        }
    }
}

fn default_concurrency() -> usize {
    1
}

fn default_script_timeout_secs() -> u64 {
    900
}

fn default_deploy_timeout_secs() -> u64 {
    3600
}

fn default_ledger_path() -> String {
    ".mig/ledger.jsonl".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl PlanConfig {
    /// Load a plan document from a file path
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            return Err(CoreError::PlanNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| CoreError::ArtifactUnreadable {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::parse(&content).map_err(|e| CoreError::PlanParseError {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Parse a plan document from YAML text
    pub fn parse(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Text fingerprinted into the plan hash.
    ///
    /// Covers what a step does (entries, servers, policy) and leaves out
    /// settings such as concurrency, so tuning a re-run does not invalidate
    /// resume.
    pub fn fingerprint_source(&self) -> CoreResult<String> {
        let view = (
            &self.connection_strings,
            &self.pre_scripts,
            &self.schema_packages,
            &self.post_scripts,
            &self.deployment_policy,
        );
        Ok(serde_json::to_string(&view)?)
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
