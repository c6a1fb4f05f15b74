//! Step executors.
//!
//! Every executor turns errors into `StepResult::Failed`; nothing raised by
//! a database or a deployer reaches the orchestrator.

use async_trait::async_trait;
use mig_core::{PackageDeployStep, SchemaPackage, ScriptStep, Step, StepResult};
use mig_db::{DbError, ExecLimits, ScriptExecutor};
use mig_deploy::{DeployError, SchemaDeployer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Runs one step of any kind
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, step: &Step, cancel: &CancellationToken) -> StepResult;
}

/// Failure reason for a database error; interruptions get a short reason
fn failure_reason(err: &DbError) -> String {
    if !err.is_interruption() {
        return err.to_string();
    }
    match err {
        DbError::Timeout(limit) => format!("timeout after {}s", limit.as_secs()),
        _ => "cancelled".to_string(),
    }
}

/// Executes SQL script steps
pub struct ScriptStepExecutor {
    db: Arc<dyn ScriptExecutor>,
    timeout: Duration,
}

impl ScriptStepExecutor {
    pub fn new(db: Arc<dyn ScriptExecutor>, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    pub async fn execute(&self, step: &ScriptStep, cancel: &CancellationToken) -> StepResult {
        let limits = ExecLimits::new(self.timeout, cancel.clone());
        log::debug!(
            "[{}] Executing {} on {}",
            step.target.database,
            step.artifact.display(),
            self.db.engine()
        );
        match self.db.execute_script(&step.target, &step.sql, &limits).await {
            Ok(()) => StepResult::Succeeded,
            Err(e) => StepResult::Failed(failure_reason(&e)),
        }
    }
}

/// Deploys schema package steps, relaying deployer messages to the log
pub struct PackageDeployStepExecutor {
    deployer: Arc<dyn SchemaDeployer>,
    timeout: Duration,
}

impl PackageDeployStepExecutor {
    pub fn new(deployer: Arc<dyn SchemaDeployer>, timeout: Duration) -> Self {
        Self { deployer, timeout }
    }

    pub async fn execute(
        &self,
        step: &PackageDeployStep,
        cancel: &CancellationToken,
    ) -> StepResult {
        let package = match SchemaPackage::load(&step.artifact) {
            Ok(package) => package,
            Err(e) => return StepResult::Failed(e.to_string()),
        };

        let limits = ExecLimits::new(self.timeout, cancel.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let database = step.target.database.as_str();

        let deploy = self
            .deployer
            .deploy(&package, &step.target, &step.policy, tx, &limits);
        let relay = async {
            while let Some(message) = rx.recv().await {
                log::info!("[{}] {}", database, message);
            }
        };
        let (result, ()) = tokio::join!(deploy, relay);

        match result {
            Ok(report) => {
                log::debug!(
                    "[{}] {} change(s) applied, {} warning(s)",
                    database,
                    report.actions_applied,
                    report.warnings.len()
                );
                StepResult::Succeeded
            }
            Err(DeployError::Db(e)) => StepResult::Failed(failure_reason(&e)),
            Err(e) => StepResult::Failed(e.to_string()),
        }
    }
}

/// Routes each step to the executor for its kind
pub struct StepDispatcher {
    scripts: ScriptStepExecutor,
    packages: PackageDeployStepExecutor,
}

impl StepDispatcher {
    pub fn new(scripts: ScriptStepExecutor, packages: PackageDeployStepExecutor) -> Self {
        Self { scripts, packages }
    }
}

#[async_trait]
impl StepExecutor for StepDispatcher {
    async fn execute(&self, step: &Step, cancel: &CancellationToken) -> StepResult {
        match step {
            Step::Script(s) => self.scripts.execute(s, cancel).await,
            Step::PackageDeploy(s) => self.packages.execute(s, cancel).await,
        }
    }
}

#[cfg(test)]
#[path = "executor_test.rs"]
mod tests;
