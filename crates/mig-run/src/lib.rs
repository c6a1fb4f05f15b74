//! mig-run - Migration orchestration for mig
//!
//! Executors turn one step into a `StepResult`; the `Orchestrator` walks the
//! plan's phases, runs each phase's steps on one lane per database, records
//! every outcome in the ledger and applies the failure policy.

pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod summary;

pub use error::{RunError, RunResult};
pub use executor::{PackageDeployStepExecutor, ScriptStepExecutor, StepDispatcher, StepExecutor};
pub use orchestrator::{Orchestrator, RunOptions, RunReport, RunState};
pub use summary::{FailureRecord, PhaseSummary, RunSummary};
