//! Deployment policy applied when a schema package is deployed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Kinds of database objects a deployment may touch or must leave alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectCategory {
    Users,
    DatabaseTriggers,
    ServerTriggers,
    Credentials,
    DatabaseOptions,
    DatabaseRoles,
    Permissions,
    Tables,
    Views,
    Indexes,
    Sequences,
}

impl ObjectCategory {
    /// Categories protected from drops unless the plan says otherwise.
    ///
    /// Security and configuration state: migrations converge the schema, they
    /// do not reset who may access it.
    pub const SECURITY_AND_CONFIGURATION: [ObjectCategory; 7] = [
        ObjectCategory::Users,
        ObjectCategory::DatabaseTriggers,
        ObjectCategory::ServerTriggers,
        ObjectCategory::Credentials,
        ObjectCategory::DatabaseOptions,
        ObjectCategory::DatabaseRoles,
        ObjectCategory::Permissions,
    ];
}

impl fmt::Display for ObjectCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjectCategory::Users => "users",
            ObjectCategory::DatabaseTriggers => "database_triggers",
            ObjectCategory::ServerTriggers => "server_triggers",
            ObjectCategory::Credentials => "credentials",
            ObjectCategory::DatabaseOptions => "database_options",
            ObjectCategory::DatabaseRoles => "database_roles",
            ObjectCategory::Permissions => "permissions",
            ObjectCategory::Tables => "tables",
            ObjectCategory::Views => "views",
            ObjectCategory::Indexes => "indexes",
            ObjectCategory::Sequences => "sequences",
        };
        f.write_str(s)
    }
}

/// Rules governing how a desired-state package is converged onto a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentPolicy {
    /// Remove objects that exist in the database but not in the package
    #[serde(default = "default_true")]
    pub drop_objects_not_in_source: bool,

    /// Object kinds never dropped, even when absent from the package
    #[serde(default = "default_retained")]
    pub retained_object_categories: BTreeSet<ObjectCategory>,

    /// Abort instead of applying a change that could lose data
    #[serde(default)]
    pub block_on_possible_data_loss: bool,

    /// Drop dependent objects that would otherwise block the deployment
    #[serde(default = "default_true")]
    pub allow_drop_blocking_assemblies: bool,

    /// Supply type defaults for new NOT NULL columns on populated tables
    #[serde(default = "default_true")]
    pub generate_smart_defaults: bool,

    /// Compare object names the way the target engine does (case-insensitively)
    #[serde(default = "default_true")]
    pub compare_using_target_collation: bool,

    /// Do not treat column collation differences as changes
    #[serde(default = "default_true")]
    pub ignore_column_collation: bool,
}

fn default_true() -> bool {
    true
}

fn default_retained() -> BTreeSet<ObjectCategory> {
    ObjectCategory::SECURITY_AND_CONFIGURATION
        .into_iter()
        .collect()
}

impl Default for DeploymentPolicy {
    fn default() -> Self {
        Self {
            drop_objects_not_in_source: true,
            retained_object_categories: default_retained(),
            block_on_possible_data_loss: false,
            allow_drop_blocking_assemblies: true,
            generate_smart_defaults: true,
            compare_using_target_collation: true,
            ignore_column_collation: true,
        }
    }
}

impl DeploymentPolicy {
    /// Whether objects of `category` may be dropped when absent from the package.
    pub fn may_drop(&self, category: ObjectCategory) -> bool {
        self.drop_objects_not_in_source && !self.retained_object_categories.contains(&category)
    }
}
