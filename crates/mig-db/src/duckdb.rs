//! DuckDB script execution backend

use crate::error::{DbError, DbResult};
use crate::script::controls_transactions;
use crate::traits::{ExecLimits, ScriptExecutor};
use async_trait::async_trait;
use duckdb::Connection;
use mig_core::TargetDatabase;

/// DuckDB backend.
///
/// Holds no connection of its own: each call opens one against the target's
/// database file and drops it before returning.
#[derive(Debug, Clone, Copy, Default)]
pub struct DuckDbBackend;

impl DuckDbBackend {
    pub fn new() -> Self {
        Self
    }

    /// Open a connection to the target, creating the database file if needed.
    ///
    /// The server directory must already exist.
    pub fn open(target: &TargetDatabase) -> DbResult<Connection> {
        let server = target.server_path();
        if !server.is_dir() {
            return Err(DbError::ConnectionError(format!(
                "server directory '{}' does not exist",
                server.display()
            )));
        }
        Connection::open(target.database_path())
            .map_err(|e| DbError::ConnectionError(format!("{}: {}", target, e)))
    }

    /// Run `work` on a connection scoped to this call.
    ///
    /// When the timeout elapses or `limits.cancel` fires, the running
    /// statement is interrupted and the worker is awaited so the connection
    /// is gone before the error is returned. Work that still completes
    /// successfully after the interrupt keeps its result.
    pub async fn run_scoped<T, E, F>(
        &self,
        target: &TargetDatabase,
        limits: &ExecLimits,
        work: F,
    ) -> Result<T, E>
    where
        T: Send + 'static,
        E: From<DbError> + Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, E> + Send + 'static,
    {
        if limits.cancel.is_cancelled() {
            return Err(DbError::Cancelled.into());
        }

        let owned = target.clone();
        let conn = tokio::task::spawn_blocking(move || Self::open(&owned))
            .await
            .map_err(DbError::from)??;
        let interrupt = conn.interrupt_handle();

        let mut worker = tokio::task::spawn_blocking(move || {
            let mut conn = conn;
            work(&mut conn)
        });

        let deadline = tokio::time::sleep(limits.timeout);
        tokio::pin!(deadline);

        let stopped = tokio::select! {
            joined = &mut worker => return joined.map_err(DbError::from)?,
            _ = &mut deadline => DbError::Timeout(limits.timeout),
            _ = limits.cancel.cancelled() => DbError::Cancelled,
        };

        log::debug!("Interrupting statement on {} ({})", target, stopped);
        interrupt.interrupt();
        match worker.await {
            // finished before the interrupt landed
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(stopped.into()),
            Err(e) => Err(DbError::from(e).into()),
        }
    }
}

#[async_trait]
impl ScriptExecutor for DuckDbBackend {
    async fn execute_script(
        &self,
        target: &TargetDatabase,
        sql: &str,
        limits: &ExecLimits,
    ) -> DbResult<()> {
        let wrap = !controls_transactions(sql);
        if !wrap {
            log::debug!("Script on {} manages its own transactions", target);
        }
        let sql = sql.to_string();

        self.run_scoped(target, limits, move |conn| -> DbResult<()> {
            if wrap {
                let tx = conn.transaction()?;
                tx.execute_batch(&sql)?;
                tx.commit()?;
            } else {
                conn.execute_batch(&sql)?;
            }
            Ok(())
        })
        .await
    }

    fn engine(&self) -> &'static str {
        "duckdb"
    }
}

#[cfg(test)]
#[path = "duckdb_test.rs"]
mod tests;
