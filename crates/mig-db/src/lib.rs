//! mig-db - SQL execution layer for mig
//!
//! This crate provides the `ScriptExecutor` trait and its DuckDB
//! implementation. Every call opens a connection scoped to that call,
//! bounded by a timeout and a cancellation token.

pub mod duckdb;
pub mod error;
pub mod script;
pub mod traits;

pub use duckdb::DuckDbBackend;
pub use error::{DbError, DbResult};
pub use traits::{ExecLimits, ScriptExecutor};
