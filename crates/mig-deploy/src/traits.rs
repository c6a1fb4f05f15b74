//! Schema deployer trait definition

use crate::error::DeployResult;
use async_trait::async_trait;
use mig_core::{DeploymentPolicy, SchemaPackage, TargetDatabase};
use mig_db::ExecLimits;
use tokio::sync::mpsc::UnboundedSender;

/// Outcome of a successful deployment
#[derive(Debug, Clone, Default)]
pub struct DeployReport {
    pub actions_applied: usize,
    /// Objects whose data was at risk and the policy allowed anyway
    pub possible_data_loss: Vec<String>,
    pub warnings: Vec<String>,
}

/// Brings a database to the state described by a schema package.
///
/// Progress messages are sent on `messages` as they happen; a closed
/// receiver is not an error.
#[async_trait]
pub trait SchemaDeployer: Send + Sync {
    async fn deploy(
        &self,
        package: &SchemaPackage,
        target: &TargetDatabase,
        policy: &DeploymentPolicy,
        messages: UnboundedSender<String>,
        limits: &ExecLimits,
    ) -> DeployResult<DeployReport>;
}
