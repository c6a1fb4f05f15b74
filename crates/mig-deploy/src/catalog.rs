//! Live catalog introspection for DuckDB databases.
//!
//! Reads user objects of the connected database from the `duckdb_*()` table
//! functions. Internal and temporary objects are never reported.

use crate::error::{DeployError, DeployResult};
use duckdb::Connection;
use mig_core::sql_utils::qualify;
use sqlparser::dialect::DuckDbDialect;
use sqlparser::tokenizer::{Token, Tokenizer};
use std::collections::HashMap;

/// Snapshot of the user objects in one database
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    /// Non-default schemas
    pub schemas: Vec<String>,
    pub tables: Vec<LiveTable>,
    pub views: Vec<LiveView>,
    pub indexes: Vec<LiveIndex>,
    pub sequences: Vec<LiveSequence>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveTable {
    pub schema: String,
    pub name: String,
    pub columns: Vec<LiveColumn>,
    pub primary_key: Vec<String>,
    pub row_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveColumn {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub collation: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveView {
    pub schema: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveIndex {
    pub schema: String,
    pub name: String,
    pub table: String,
    pub unique: bool,
    /// `CREATE INDEX` statement as stored by the engine
    pub sql: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveSequence {
    pub schema: String,
    pub name: String,
    pub start: i64,
    pub increment: i64,
}

/// Run `sql` and map every row
fn query_rows<T, F>(conn: &Connection, what: &str, sql: &str, f: F) -> DeployResult<Vec<T>>
where
    F: FnMut(&duckdb::Row<'_>) -> duckdb::Result<T>,
{
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| DeployError::Catalog(format!("{what}: {e}")))?;
    let rows = stmt
        .query_map([], f)
        .map_err(|e| DeployError::Catalog(format!("{what}: {e}")))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DeployError::Catalog(format!("{what}: {e}")))?;
    Ok(rows)
}

/// Read the catalog of the database `conn` is attached to
pub fn read_catalog(conn: &Connection) -> DeployResult<Catalog> {
    let schemas = query_rows(
        conn,
        "schemas",
        "SELECT schema_name FROM duckdb_schemas() \
         WHERE database_name = current_database() AND NOT internal \
         AND schema_name NOT IN ('main', 'information_schema', 'pg_catalog') \
         ORDER BY schema_name",
        |row| row.get::<_, String>(0),
    )?;

    let table_rows = query_rows(
        conn,
        "tables",
        "SELECT schema_name, table_name, sql FROM duckdb_tables() \
         WHERE database_name = current_database() AND NOT internal AND NOT temporary \
         ORDER BY schema_name, table_name",
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        },
    )?;

    let column_rows = query_rows(
        conn,
        "columns",
        "SELECT schema_name, table_name, column_name, data_type, is_nullable, column_default \
         FROM duckdb_columns() \
         WHERE database_name = current_database() \
         ORDER BY schema_name, table_name, column_index",
        |row| {
            Ok((
                (row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                LiveColumn {
                    name: row.get(2)?,
                    data_type: row.get(3)?,
                    nullable: row.get(4)?,
                    default: row.get(5)?,
                    collation: None,
                },
            ))
        },
    )?;
    let mut columns: HashMap<(String, String), Vec<LiveColumn>> = HashMap::new();
    for (key, column) in column_rows {
        columns.entry(key).or_default().push(column);
    }

    let pk_rows = query_rows(
        conn,
        "primary keys",
        "SELECT schema_name, table_name, list_aggregate(constraint_column_names, 'string_agg', ',') \
         FROM duckdb_constraints() \
         WHERE database_name = current_database() AND constraint_type = 'PRIMARY KEY'",
        |row| {
            Ok((
                (row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                row.get::<_, String>(2)?,
            ))
        },
    )?;
    let primary_keys: HashMap<(String, String), Vec<String>> = pk_rows
        .into_iter()
        .map(|(key, cols)| (key, cols.split(',').map(str::to_string).collect()))
        .collect();

    let mut tables = Vec::with_capacity(table_rows.len());
    for (schema, name, sql) in table_rows {
        let key = (schema.clone(), name.clone());
        let mut table_columns = columns.remove(&key).unwrap_or_default();
        if let Some(sql) = sql.as_deref() {
            let collations = column_collations(sql);
            for column in &mut table_columns {
                column.collation = collations.get(&column.name.to_lowercase()).cloned();
            }
        }
        let row_count: i64 = conn
            .query_row(
                &format!("SELECT count(*) FROM {}", qualify(&schema, &name)),
                [],
                |row| row.get(0),
            )
            .map_err(|e| DeployError::Catalog(format!("row count of {schema}.{name}: {e}")))?;
        tables.push(LiveTable {
            primary_key: primary_keys.get(&key).cloned().unwrap_or_default(),
            schema,
            name,
            columns: table_columns,
            row_count: row_count.max(0) as u64,
        });
    }

    let views = query_rows(
        conn,
        "views",
        "SELECT schema_name, view_name FROM duckdb_views() \
         WHERE database_name = current_database() AND NOT internal AND NOT temporary \
         ORDER BY schema_name, view_name",
        |row| {
            Ok(LiveView {
                schema: row.get(0)?,
                name: row.get(1)?,
            })
        },
    )?;

    let indexes = query_rows(
        conn,
        "indexes",
        "SELECT schema_name, index_name, table_name, is_unique, sql FROM duckdb_indexes() \
         WHERE database_name = current_database() \
         ORDER BY schema_name, index_name",
        |row| {
            Ok(LiveIndex {
                schema: row.get(0)?,
                name: row.get(1)?,
                table: row.get(2)?,
                unique: row.get(3)?,
                sql: row.get(4)?,
            })
        },
    )?;

    let sequences = query_rows(
        conn,
        "sequences",
        "SELECT schema_name, sequence_name, start_value, increment_by FROM duckdb_sequences() \
         WHERE database_name = current_database() AND NOT temporary \
         ORDER BY schema_name, sequence_name",
        |row| {
            Ok(LiveSequence {
                schema: row.get(0)?,
                name: row.get(1)?,
                start: row.get(2)?,
                increment: row.get(3)?,
            })
        },
    )?;

    Ok(Catalog {
        schemas,
        tables,
        views,
        indexes,
        sequences,
    })
}

/// Column collations declared in a `CREATE TABLE` statement, keyed by
/// lowercased column name.
pub fn column_collations(create_sql: &str) -> HashMap<String, String> {
    let dialect = DuckDbDialect {};
    let Ok(tokens) = Tokenizer::new(&dialect, create_sql).tokenize() else {
        return HashMap::new();
    };

    let mut collations = HashMap::new();
    let mut depth = 0usize;
    let mut column: Option<String> = None;
    let mut tokens = tokens
        .into_iter()
        .filter(|t| !matches!(t, Token::Whitespace(_)))
        .peekable();

    while let Some(token) = tokens.next() {
        match token {
            Token::LParen => {
                depth += 1;
                if depth == 1 {
                    column = None;
                }
            }
            Token::RParen => depth = depth.saturating_sub(1),
            Token::Comma if depth == 1 => column = None,
            Token::Word(word) if depth == 1 => {
                if column.is_none() {
                    column = Some(word.value.to_lowercase());
                } else if word.value.eq_ignore_ascii_case("COLLATE") {
                    let mut name = String::new();
                    if let Some(Token::Word(part)) = tokens.peek() {
                        name.push_str(&part.value);
                        tokens.next();
                        while matches!(tokens.peek(), Some(Token::Period)) {
                            tokens.next();
                            if let Some(Token::Word(part)) = tokens.next() {
                                name.push('.');
                                name.push_str(&part.value);
                            }
                        }
                    }
                    if let (Some(col), false) = (&column, name.is_empty()) {
                        collations.insert(col.clone(), name.to_lowercase());
                    }
                }
            }
            _ => {}
        }
    }
    collations
}
