//! Target database identity.

use crate::names::DatabaseName;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// File extension of DuckDB database files inside a server directory
pub const DATABASE_FILE_EXTENSION: &str = "duckdb";

/// Connection identity of one database: a server plus a database name.
///
/// A server is a directory of database files; `Sales` on `/srv/db` is
/// `/srv/db/Sales.duckdb`. The value carries no connection; executors open
/// one for the duration of a step and drop it on every exit path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetDatabase {
    pub server: PathBuf,
    pub database: DatabaseName,
}

impl TargetDatabase {
    pub fn new(server: impl Into<PathBuf>, database: DatabaseName) -> Self {
        Self {
            server: server.into(),
            database,
        }
    }

    /// Path of the database file this target resolves to
    pub fn database_path(&self) -> PathBuf {
        self.server
            .join(format!("{}.{}", self.database, DATABASE_FILE_EXTENSION))
    }

    pub fn server_path(&self) -> &Path {
        &self.server
    }
}

impl fmt::Display for TargetDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.database, self.server.display())
    }
}
