//! mig-deploy - Schema package deployment for mig
//!
//! The `SchemaDeployer` trait is what the runner depends on. `DuckDbDeployer`
//! is the bundled implementation: it reads the live catalog, computes the
//! changes needed to reach the package's desired state under a
//! `DeploymentPolicy`, and applies them in one transaction.

pub mod catalog;
pub mod deployer;
pub mod diff;
pub mod error;
pub mod traits;
pub mod types;

pub use deployer::DuckDbDeployer;
pub use diff::{plan_changes, Action, ActionKind, ChangeSet};
pub use error::{DeployError, DeployResult};
pub use traits::{DeployReport, SchemaDeployer};
