//! DuckDB desired-state deployer

use crate::catalog::read_catalog;
use crate::diff::plan_changes;
use crate::error::{DeployError, DeployResult};
use crate::traits::{DeployReport, SchemaDeployer};
use async_trait::async_trait;
use duckdb::Connection;
use mig_core::{DeploymentPolicy, SchemaPackage, TargetDatabase};
use mig_db::{DuckDbBackend, ExecLimits};
use tokio::sync::mpsc::UnboundedSender;

/// Deploys schema packages to DuckDB database files
#[derive(Debug, Clone, Copy, Default)]
pub struct DuckDbDeployer {
    db: DuckDbBackend,
}

impl DuckDbDeployer {
    pub fn new() -> Self {
        Self {
            db: DuckDbBackend::new(),
        }
    }
}

#[async_trait]
impl SchemaDeployer for DuckDbDeployer {
    async fn deploy(
        &self,
        package: &SchemaPackage,
        target: &TargetDatabase,
        policy: &DeploymentPolicy,
        messages: UnboundedSender<String>,
        limits: &ExecLimits,
    ) -> DeployResult<DeployReport> {
        let package = package.clone();
        let policy = policy.clone();
        self.db
            .run_scoped(target, limits, move |conn| {
                deploy_on(conn, &package, &policy, &messages)
            })
            .await
    }
}

/// Diff and apply on an open connection.
///
/// Policy gates run before the transaction starts. Any failing statement
/// rolls back everything applied so far.
pub fn deploy_on(
    conn: &mut Connection,
    package: &SchemaPackage,
    policy: &DeploymentPolicy,
    messages: &UnboundedSender<String>,
) -> DeployResult<DeployReport> {
    // the receiver going away must not fail the deployment
    let emit = |message: String| {
        let _ = messages.send(message);
    };

    emit("Analyzing database schema".to_string());
    let catalog = read_catalog(conn)?;
    let changes = plan_changes(package, &catalog, policy)?;
    changes.check(policy)?;

    for warning in &changes.warnings {
        emit(warning.clone());
    }
    for object in &changes.possible_data_loss {
        emit(format!("Possible data loss accepted: {}", object));
    }
    if changes.is_empty() {
        emit("Database is up to date".to_string());
        return Ok(DeployReport {
            actions_applied: 0,
            possible_data_loss: changes.possible_data_loss,
            warnings: changes.warnings,
        });
    }

    let tx = conn.transaction().map_err(|e| DeployError::Apply {
        action: "Starting deployment transaction".to_string(),
        message: e.to_string(),
    })?;
    for action in &changes.actions {
        emit(action.describe());
        for statement in &action.statements {
            log::debug!("{}", statement);
            tx.execute_batch(statement)
                .map_err(|e| DeployError::Apply {
                    action: action.describe(),
                    message: e.to_string(),
                })?;
        }
    }
    tx.commit().map_err(|e| DeployError::Apply {
        action: "Committing deployment".to_string(),
        message: e.to_string(),
    })?;
    emit("Update complete".to_string());

    Ok(DeployReport {
        actions_applied: changes.actions.len(),
        possible_data_loss: changes.possible_data_loss,
        warnings: changes.warnings,
    })
}

#[cfg(test)]
#[path = "deployer_test.rs"]
mod tests;
