//! Schema package: the declarative desired state of one database.
//!
//! ```yaml
//! schemas: [staging]
//! tables:
//!   - name: customers
//!     columns:
//!       - { name: id, type: INTEGER, nullable: false }
//!       - { name: email, type: VARCHAR, collation: nocase }
//!     primary_key: [id]
//! views:
//!   - { name: active_customers, sql: "SELECT * FROM customers" }
//! indexes:
//!   - { name: idx_customers_email, table: customers, columns: [email] }
//! sequences:
//!   - { name: customer_ids, start: 1000 }
//! ```

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

fn default_schema() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}

fn default_one() -> i64 {
    1
}

/// Desired state of one database
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaPackage {
    #[serde(default)]
    pub schemas: Vec<String>,
    #[serde(default)]
    pub tables: Vec<TableDef>,
    #[serde(default)]
    pub views: Vec<ViewDef>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
    #[serde(default)]
    pub sequences: Vec<SequenceDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableDef {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub primary_key: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// SQL expression used as the column default
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub collation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ViewDef {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub name: String,
    /// The SELECT the view wraps
    pub sql: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexDef {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SequenceDef {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub name: String,
    #[serde(default = "default_one")]
    pub start: i64,
    #[serde(default = "default_one")]
    pub increment: i64,
}

impl SchemaPackage {
    /// Load and check a package file
    pub fn load(path: &Path) -> CoreResult<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| CoreError::ArtifactUnreadable {
                path: path.display().to_string(),
                source: e,
            })?;
        let package: SchemaPackage =
            serde_yaml::from_str(&content).map_err(|e| CoreError::PackageInvalid {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        package
            .check()
            .map_err(|message| CoreError::PackageInvalid {
                path: path.display().to_string(),
                message,
            })?;
        Ok(package)
    }

    /// Internal consistency: unique names, columns exist, no empty tables
    pub fn check(&self) -> Result<(), String> {
        let mut relations = HashSet::new();
        for table in &self.tables {
            if table.columns.is_empty() {
                return Err(format!("table '{}' has no columns", table.name));
            }
            if !relations.insert(key(&table.schema, &table.name)) {
                return Err(format!("duplicate relation '{}.{}'", table.schema, table.name));
            }
            let mut columns = HashSet::new();
            for column in &table.columns {
                if !columns.insert(column.name.to_lowercase()) {
                    return Err(format!(
                        "duplicate column '{}' in table '{}'",
                        column.name, table.name
                    ));
                }
            }
            for pk in &table.primary_key {
                if !columns.contains(&pk.to_lowercase()) {
                    return Err(format!(
                        "primary key column '{}' not found in table '{}'",
                        pk, table.name
                    ));
                }
            }
        }
        for view in &self.views {
            if !relations.insert(key(&view.schema, &view.name)) {
                return Err(format!("duplicate relation '{}.{}'", view.schema, view.name));
            }
        }

        let mut indexes = HashSet::new();
        for index in &self.indexes {
            if !indexes.insert(key(&index.schema, &index.name)) {
                return Err(format!("duplicate index '{}'", index.name));
            }
            if index.columns.is_empty() {
                return Err(format!("index '{}' has no columns", index.name));
            }
            let Some(table) = self.table(&index.schema, &index.table) else {
                return Err(format!(
                    "index '{}' refers to unknown table '{}'",
                    index.name, index.table
                ));
            };
            for col in &index.columns {
                if !table.columns.iter().any(|c| c.name.eq_ignore_ascii_case(col)) {
                    return Err(format!(
                        "index '{}' refers to unknown column '{}'",
                        index.name, col
                    ));
                }
            }
        }

        let mut sequences = HashSet::new();
        for seq in &self.sequences {
            if !sequences.insert(key(&seq.schema, &seq.name)) {
                return Err(format!("duplicate sequence '{}'", seq.name));
            }
            if seq.increment == 0 {
                return Err(format!("sequence '{}' has a zero increment", seq.name));
            }
        }
        Ok(())
    }

    pub fn table(&self, schema: &str, name: &str) -> Option<&TableDef> {
        self.tables
            .iter()
            .find(|t| t.schema.eq_ignore_ascii_case(schema) && t.name.eq_ignore_ascii_case(name))
    }

    /// Every schema the package needs, declared or implied, `main` excluded
    pub fn required_schemas(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let implied = self
            .tables
            .iter()
            .map(|t| &t.schema)
            .chain(self.views.iter().map(|v| &v.schema))
            .chain(self.sequences.iter().map(|s| &s.schema));
        self.schemas
            .iter()
            .chain(implied)
            .filter(|s| !s.eq_ignore_ascii_case("main"))
            .filter(|s| seen.insert(s.to_lowercase()))
            .cloned()
            .collect()
    }
}

fn key(schema: &str, name: &str) -> (String, String) {
    (schema.to_lowercase(), name.to_lowercase())
}
