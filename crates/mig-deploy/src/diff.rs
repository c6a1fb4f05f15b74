//! Desired-state diff: package + live catalog + policy -> ordered actions.

use crate::catalog::{Catalog, LiveColumn, LiveIndex, LiveTable};
use crate::error::{DeployError, DeployResult};
use crate::types::{is_widening, normalize_expr, normalize_type, smart_default};
use mig_core::package::{ColumnDef, IndexDef, TableDef};
use mig_core::sql_utils::{qualify, quote_ident};
use mig_core::{DeploymentPolicy, ObjectCategory, SchemaPackage};
use std::collections::{HashMap, HashSet};

/// Kinds of change, in the order they are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionKind {
    CreateSchema,
    DropView,
    DropIndex,
    DropTable,
    CreateSequence,
    CreateTable,
    AlterTable,
    CreateIndex,
    CreateView,
    DropSequence,
}

impl ActionKind {
    fn verb(&self) -> &'static str {
        match self {
            ActionKind::CreateSchema => "Creating schema",
            ActionKind::DropView => "Dropping view",
            ActionKind::DropIndex => "Dropping index",
            ActionKind::DropTable => "Dropping table",
            ActionKind::CreateSequence => "Creating sequence",
            ActionKind::CreateTable => "Creating table",
            ActionKind::AlterTable => "Altering table",
            ActionKind::CreateIndex => "Creating index",
            ActionKind::CreateView => "Creating view",
            ActionKind::DropSequence => "Dropping sequence",
        }
    }
}

/// One object-level change and the statements that perform it
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub kind: ActionKind,
    /// `schema.name` of the object
    pub object: String,
    pub statements: Vec<String>,
}

impl Action {
    fn new(kind: ActionKind, schema: &str, name: &str, statements: Vec<String>) -> Self {
        Self {
            kind,
            object: format!("{}.{}", schema, name),
            statements,
        }
    }

    pub fn describe(&self) -> String {
        format!("{} {}", self.kind.verb(), self.object)
    }
}

/// Everything a deployment would do, before any policy gate
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub actions: Vec<Action>,
    pub possible_data_loss: Vec<String>,
    /// Indexes that must be dropped so their tables can be altered
    pub blocking_objects: Vec<String>,
    pub warnings: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Apply the blocking gates of `policy`; nothing has run yet when this fails
    pub fn check(&self, policy: &DeploymentPolicy) -> DeployResult<()> {
        if !policy.allow_drop_blocking_assemblies && !self.blocking_objects.is_empty() {
            return Err(DeployError::BlockingObjects {
                objects: self.blocking_objects.join(", "),
            });
        }
        if policy.block_on_possible_data_loss && !self.possible_data_loss.is_empty() {
            return Err(DeployError::DataLoss {
                objects: self.possible_data_loss.join(", "),
            });
        }
        Ok(())
    }
}

/// Identifier comparison rule
#[derive(Debug, Clone, Copy)]
struct Names {
    case_insensitive: bool,
}

impl Names {
    fn key(&self, name: &str) -> String {
        if self.case_insensitive {
            name.to_lowercase()
        } else {
            name.to_string()
        }
    }

    fn key2(&self, schema: &str, name: &str) -> (String, String) {
        (self.key(schema), self.key(name))
    }
}

/// Compute the changes that bring `catalog` to the state of `package`
pub fn plan_changes(
    package: &SchemaPackage,
    catalog: &Catalog,
    policy: &DeploymentPolicy,
) -> DeployResult<ChangeSet> {
    let names = Names {
        case_insensitive: policy.compare_using_target_collation,
    };
    let mut changes = ChangeSet::default();

    let live_schemas: HashSet<String> = catalog.schemas.iter().map(|s| names.key(s)).collect();
    for schema in package.required_schemas() {
        if !live_schemas.contains(&names.key(&schema)) {
            changes.actions.push(Action {
                kind: ActionKind::CreateSchema,
                object: schema.clone(),
                statements: vec![format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&schema))],
            });
        }
    }

    let altered = diff_tables(package, catalog, policy, names, &mut changes)?;
    diff_indexes(package, catalog, policy, names, &altered, &mut changes);
    diff_views(package, catalog, policy, names, &mut changes);
    diff_sequences(package, catalog, policy, names, &mut changes);

    changes.actions.sort_by_key(|a| a.kind);
    Ok(changes)
}

/// Returns keys of live tables whose columns change
fn diff_tables(
    package: &SchemaPackage,
    catalog: &Catalog,
    policy: &DeploymentPolicy,
    names: Names,
    changes: &mut ChangeSet,
) -> DeployResult<HashSet<(String, String)>> {
    let live: HashMap<(String, String), &LiveTable> = catalog
        .tables
        .iter()
        .map(|t| (names.key2(&t.schema, &t.name), t))
        .collect();
    let desired: HashSet<(String, String)> = package
        .tables
        .iter()
        .map(|t| names.key2(&t.schema, &t.name))
        .collect();

    let mut altered = HashSet::new();
    for table in &package.tables {
        let key = names.key2(&table.schema, &table.name);
        match live.get(&key) {
            None => changes.actions.push(Action::new(
                ActionKind::CreateTable,
                &table.schema,
                &table.name,
                vec![create_table_sql(table)],
            )),
            Some(live_table) => {
                let statements = alter_table(table, live_table, policy, names, changes)?;
                if !statements.is_empty() {
                    altered.insert(key);
                    changes.actions.push(Action::new(
                        ActionKind::AlterTable,
                        &table.schema,
                        &table.name,
                        statements,
                    ));
                }
            }
        }
    }

    for table in &catalog.tables {
        if desired.contains(&names.key2(&table.schema, &table.name)) {
            continue;
        }
        if policy.may_drop(ObjectCategory::Tables) {
            if table.row_count > 0 {
                changes.possible_data_loss.push(format!(
                    "table {}.{} ({} rows)",
                    table.schema, table.name, table.row_count
                ));
            }
            changes.actions.push(Action::new(
                ActionKind::DropTable,
                &table.schema,
                &table.name,
                vec![format!("DROP TABLE {}", qualify(&table.schema, &table.name))],
            ));
        } else if policy.drop_objects_not_in_source {
            changes.warnings.push(format!(
                "Table {}.{} is not in the package and is retained",
                table.schema, table.name
            ));
        }
    }
    Ok(altered)
}

fn alter_table(
    table: &TableDef,
    live: &LiveTable,
    policy: &DeploymentPolicy,
    names: Names,
    changes: &mut ChangeSet,
) -> DeployResult<Vec<String>> {
    let qualified = qualify(&table.schema, &table.name);
    let populated = live.row_count > 0;

    let desired_pk: Vec<String> = table.primary_key.iter().map(|c| names.key(c)).collect();
    let live_pk: Vec<String> = live.primary_key.iter().map(|c| names.key(c)).collect();
    if desired_pk != live_pk {
        return Err(DeployError::Unsupported(format!(
            "primary key of {}.{} changes from ({}) to ({})",
            table.schema,
            table.name,
            live.primary_key.join(", "),
            table.primary_key.join(", ")
        )));
    }

    let live_columns: HashMap<String, &LiveColumn> =
        live.columns.iter().map(|c| (names.key(&c.name), c)).collect();
    let desired_columns: HashSet<String> =
        table.columns.iter().map(|c| names.key(&c.name)).collect();

    let mut statements = Vec::new();

    for column in &live.columns {
        if desired_columns.contains(&names.key(&column.name)) {
            continue;
        }
        if populated {
            changes.possible_data_loss.push(format!(
                "column {}.{}.{}",
                table.schema, table.name, column.name
            ));
        }
        statements.push(format!(
            "ALTER TABLE {} DROP COLUMN {}",
            qualified,
            quote_ident(&column.name)
        ));
    }

    for column in &table.columns {
        let col = quote_ident(&column.name);
        let nullable = column.nullable && !desired_pk.contains(&names.key(&column.name));

        let Some(existing) = live_columns.get(&names.key(&column.name)) else {
            statements.extend(add_column(table, column, nullable, populated, policy)?);
            continue;
        };

        let type_changed = normalize_type(&column.data_type) != normalize_type(&existing.data_type);
        let collation_changed = !policy.ignore_column_collation
            && column.collation.as_deref().map(str::to_lowercase)
                != existing.collation.as_deref().map(str::to_lowercase);
        if type_changed || collation_changed {
            if type_changed && populated && !is_widening(&existing.data_type, &column.data_type) {
                changes.possible_data_loss.push(format!(
                    "column {}.{}.{} ({} to {})",
                    table.schema,
                    table.name,
                    column.name,
                    normalize_type(&existing.data_type),
                    normalize_type(&column.data_type)
                ));
            }
            statements.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} SET DATA TYPE {}",
                qualified,
                col,
                column_type_sql(column)
            ));
        }

        let desired_default = column.default.as_deref().map(normalize_expr);
        let live_default = existing.default.as_deref().map(normalize_expr);
        if desired_default != live_default {
            statements.push(match &column.default {
                Some(expr) => format!(
                    "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                    qualified, col, expr
                ),
                None => format!("ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT", qualified, col),
            });
        }

        if nullable != existing.nullable {
            let verb = if nullable { "DROP" } else { "SET" };
            statements.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} {} NOT NULL",
                qualified, col, verb
            ));
        }
    }

    Ok(statements)
}

fn add_column(
    table: &TableDef,
    column: &ColumnDef,
    nullable: bool,
    populated: bool,
    policy: &DeploymentPolicy,
) -> DeployResult<Vec<String>> {
    let qualified = qualify(&table.schema, &table.name);
    let col = quote_ident(&column.name);

    let smart = if !nullable && column.default.is_none() && populated {
        let name = format!("{}.{}.{}", table.schema, table.name, column.name);
        if !policy.generate_smart_defaults {
            return Err(DeployError::MissingDefault {
                column: name,
                detail: "smart defaults are disabled".to_string(),
            });
        }
        let Some(value) = smart_default(&column.data_type) else {
            return Err(DeployError::MissingDefault {
                column: name,
                detail: format!("no smart default for type {}", column.data_type),
            });
        };
        Some(value)
    } else {
        None
    };

    let mut add = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        qualified,
        col,
        column_type_sql(column)
    );
    if let Some(expr) = column.default.as_deref().or(smart) {
        add.push_str(&format!(" DEFAULT {}", expr));
    }

    let mut statements = vec![add];
    if !nullable {
        statements.push(format!(
            "ALTER TABLE {} ALTER COLUMN {} SET NOT NULL",
            qualified, col
        ));
    }
    if smart.is_some() {
        statements.push(format!(
            "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT",
            qualified, col
        ));
    }
    Ok(statements)
}

fn diff_indexes(
    package: &SchemaPackage,
    catalog: &Catalog,
    policy: &DeploymentPolicy,
    names: Names,
    altered: &HashSet<(String, String)>,
    changes: &mut ChangeSet,
) {
    let live: HashMap<(String, String), &LiveIndex> = catalog
        .indexes
        .iter()
        .map(|i| (names.key2(&i.schema, &i.name), i))
        .collect();
    let desired: HashSet<(String, String)> = package
        .indexes
        .iter()
        .map(|i| names.key2(&i.schema, &i.name))
        .collect();
    let dropped_tables: HashSet<(String, String)> = changes
        .actions
        .iter()
        .filter(|a| a.kind == ActionKind::DropTable)
        .filter_map(|a| a.object.split_once('.'))
        .map(|(s, n)| names.key2(s, n))
        .collect();

    for index in &package.indexes {
        let create = Action::new(
            ActionKind::CreateIndex,
            &index.schema,
            &index.name,
            vec![create_index_sql(index)],
        );
        match live.get(&names.key2(&index.schema, &index.name)) {
            None => changes.actions.push(create),
            Some(existing) => {
                let blocking = altered.contains(&names.key2(&existing.schema, &existing.table));
                if blocking {
                    changes
                        .blocking_objects
                        .push(format!("index {}.{}", existing.schema, existing.name));
                }
                if blocking || !index_matches(index, existing, names) {
                    changes.actions.push(drop_index(existing));
                    changes.actions.push(create);
                }
            }
        }
    }

    for index in &catalog.indexes {
        if desired.contains(&names.key2(&index.schema, &index.name)) {
            continue;
        }
        let table = names.key2(&index.schema, &index.table);
        if dropped_tables.contains(&table) || policy.may_drop(ObjectCategory::Indexes) {
            changes.actions.push(drop_index(index));
        } else if altered.contains(&table) {
            changes
                .blocking_objects
                .push(format!("index {}.{}", index.schema, index.name));
            if let Some(sql) = &index.sql {
                changes.actions.push(drop_index(index));
                changes.actions.push(Action::new(
                    ActionKind::CreateIndex,
                    &index.schema,
                    &index.name,
                    vec![sql.trim_end_matches(';').to_string()],
                ));
            }
        }
    }
}

fn drop_index(index: &LiveIndex) -> Action {
    Action::new(
        ActionKind::DropIndex,
        &index.schema,
        &index.name,
        vec![format!("DROP INDEX {}", qualify(&index.schema, &index.name))],
    )
}

fn diff_views(
    package: &SchemaPackage,
    catalog: &Catalog,
    policy: &DeploymentPolicy,
    names: Names,
    changes: &mut ChangeSet,
) {
    let desired: HashSet<(String, String)> = package
        .views
        .iter()
        .map(|v| names.key2(&v.schema, &v.name))
        .collect();

    // views are always recreated so they rebind to the deployed tables
    for view in &catalog.views {
        let keep = desired.contains(&names.key2(&view.schema, &view.name));
        if keep || policy.may_drop(ObjectCategory::Views) {
            changes.actions.push(Action::new(
                ActionKind::DropView,
                &view.schema,
                &view.name,
                vec![format!("DROP VIEW {}", qualify(&view.schema, &view.name))],
            ));
        } else if policy.drop_objects_not_in_source {
            changes.warnings.push(format!(
                "View {}.{} is not in the package and is retained",
                view.schema, view.name
            ));
        }
    }

    for view in &package.views {
        changes.actions.push(Action::new(
            ActionKind::CreateView,
            &view.schema,
            &view.name,
            vec![format!(
                "CREATE VIEW {} AS {}",
                qualify(&view.schema, &view.name),
                view.sql.trim().trim_end_matches(';')
            )],
        ));
    }
}

fn diff_sequences(
    package: &SchemaPackage,
    catalog: &Catalog,
    policy: &DeploymentPolicy,
    names: Names,
    changes: &mut ChangeSet,
) {
    let live: HashMap<(String, String), _> = catalog
        .sequences
        .iter()
        .map(|s| (names.key2(&s.schema, &s.name), s))
        .collect();
    let desired: HashSet<(String, String)> = package
        .sequences
        .iter()
        .map(|s| names.key2(&s.schema, &s.name))
        .collect();

    for seq in &package.sequences {
        match live.get(&names.key2(&seq.schema, &seq.name)) {
            None => changes.actions.push(Action::new(
                ActionKind::CreateSequence,
                &seq.schema,
                &seq.name,
                vec![format!(
                    "CREATE SEQUENCE {} START WITH {} INCREMENT BY {}",
                    qualify(&seq.schema, &seq.name),
                    seq.start,
                    seq.increment
                )],
            )),
            Some(existing) if existing.increment != seq.increment => {
                changes.warnings.push(format!(
                    "Sequence {}.{} increments by {} in the database and is left unchanged",
                    seq.schema, seq.name, existing.increment
                ));
            }
            Some(_) => {}
        }
    }

    for seq in &catalog.sequences {
        if desired.contains(&names.key2(&seq.schema, &seq.name)) {
            continue;
        }
        if policy.may_drop(ObjectCategory::Sequences) {
            changes.actions.push(Action::new(
                ActionKind::DropSequence,
                &seq.schema,
                &seq.name,
                vec![format!("DROP SEQUENCE {}", qualify(&seq.schema, &seq.name))],
            ));
        }
    }
}

fn column_type_sql(column: &ColumnDef) -> String {
    match &column.collation {
        Some(collation) => format!("{} COLLATE {}", column.data_type, collation),
        None => column.data_type.clone(),
    }
}

fn create_table_sql(table: &TableDef) -> String {
    let mut parts: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            let mut def = format!("{} {}", quote_ident(&c.name), column_type_sql(c));
            if !c.nullable {
                def.push_str(" NOT NULL");
            }
            if let Some(expr) = &c.default {
                def.push_str(&format!(" DEFAULT {}", expr));
            }
            def
        })
        .collect();
    if !table.primary_key.is_empty() {
        let cols: Vec<String> = table.primary_key.iter().map(|c| quote_ident(c)).collect();
        parts.push(format!("PRIMARY KEY ({})", cols.join(", ")));
    }
    format!(
        "CREATE TABLE {} ({})",
        qualify(&table.schema, &table.name),
        parts.join(", ")
    )
}

fn create_index_sql(index: &IndexDef) -> String {
    let cols: Vec<String> = index.columns.iter().map(|c| quote_ident(c)).collect();
    format!(
        "CREATE {}INDEX {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        quote_ident(&index.name),
        qualify(&index.schema, &index.table),
        cols.join(", ")
    )
}

fn index_matches(desired: &IndexDef, live: &LiveIndex, names: Names) -> bool {
    if desired.unique != live.unique || names.key(&desired.table) != names.key(&live.table) {
        return false;
    }
    let Some(sql) = &live.sql else {
        return true;
    };
    let wanted: Vec<String> = desired.columns.iter().map(|c| names.key(c)).collect();
    index_columns(sql)
        .map(|cols| cols.iter().map(|c| names.key(c)).collect::<Vec<_>>() == wanted)
        .unwrap_or(false)
}

/// Column list of a stored `CREATE INDEX` statement
fn index_columns(sql: &str) -> Option<Vec<String>> {
    let close = sql.rfind(')')?;
    let mut depth = 0usize;
    let mut open = None;
    for (i, c) in sql[..close].char_indices().rev() {
        match c {
            ')' => depth += 1,
            '(' if depth == 0 => {
                open = Some(i);
                break;
            }
            '(' => depth -= 1,
            _ => {}
        }
    }
    let inner = &sql[open? + 1..close];
    Some(
        inner
            .split(',')
            .map(|c| c.trim().trim_matches('"').to_string())
            .collect(),
    )
}

#[cfg(test)]
#[path = "diff_test.rs"]
mod tests;
