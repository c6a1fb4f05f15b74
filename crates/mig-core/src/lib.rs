//! mig-core - Core library for mig
//!
//! This crate provides the migration plan model, plan-file loading and
//! validation, the lazy step source, step results, the schema package model,
//! and the append-only execution ledger shared by every other mig crate.

pub mod checksum;
pub mod config;
pub mod error;
pub mod ledger;
pub mod names;
pub mod package;
pub mod plan;
pub mod policy;
pub mod result;
pub mod source;
pub mod sql_utils;
pub mod step;
pub mod target;

pub use checksum::compute_checksum;
pub use config::{FailurePolicy, PlanConfig, DEFAULT_PLAN_FILE};
pub use error::{CoreError, CoreResult};
pub use ledger::{new_run_id, ExecutionLedger, LedgerEntry};
pub use names::{DatabaseName, StepId};
pub use package::SchemaPackage;
pub use plan::{AppIdentity, MigrationPlan, Phase, PhaseEntry, PhaseKind, RunSettings};
pub use policy::{DeploymentPolicy, ObjectCategory};
pub use result::StepResult;
pub use source::{phase_targets, StepSource};
pub use step::{PackageDeployStep, ScriptStep, Step};
pub use target::TargetDatabase;
