//! Typed migration steps.

use crate::names::StepId;
use crate::plan::PhaseKind;
use crate::policy::DeploymentPolicy;
use crate::target::TargetDatabase;
use std::path::{Path, PathBuf};

/// Run one SQL script against one database
#[derive(Debug, Clone)]
pub struct ScriptStep {
    pub id: StepId,
    pub phase: PhaseKind,
    pub target: TargetDatabase,
    pub artifact: PathBuf,
    /// Position within the phase, in declared order
    pub order: usize,
    /// Full script text, executed as one batch
    pub sql: String,
}

/// Deploy one schema package to one database
#[derive(Debug, Clone)]
pub struct PackageDeployStep {
    pub id: StepId,
    pub phase: PhaseKind,
    pub target: TargetDatabase,
    pub artifact: PathBuf,
    pub order: usize,
    pub policy: DeploymentPolicy,
}

/// One unit of migration work
#[derive(Debug, Clone)]
pub enum Step {
    Script(ScriptStep),
    PackageDeploy(PackageDeployStep),
}

impl Step {
    pub fn id(&self) -> &StepId {
        match self {
            Step::Script(s) => &s.id,
            Step::PackageDeploy(s) => &s.id,
        }
    }

    pub fn phase(&self) -> PhaseKind {
        match self {
            Step::Script(s) => s.phase,
            Step::PackageDeploy(s) => s.phase,
        }
    }

    pub fn target(&self) -> &TargetDatabase {
        match self {
            Step::Script(s) => &s.target,
            Step::PackageDeploy(s) => &s.target,
        }
    }

    pub fn artifact(&self) -> &Path {
        match self {
            Step::Script(s) => &s.artifact,
            Step::PackageDeploy(s) => &s.artifact,
        }
    }

    pub fn order(&self) -> usize {
        match self {
            Step::Script(s) => s.order,
            Step::PackageDeploy(s) => s.order,
        }
    }

    /// Short label for log lines
    pub fn kind_label(&self) -> &'static str {
        match self {
            Step::Script(_) => "script",
            Step::PackageDeploy(_) => "package",
        }
    }
}
