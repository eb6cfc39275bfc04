//! Additive synchronization of the measurement table.
//!
//! The synchronizer only ever creates: the table when it is missing, columns
//! the live table lacks, and the fixed index set. It never drops or retypes,
//! so running it against a complete table is a no-op apart from re-asserting
//! indexes with `IF NOT EXISTS`.

use std::sync::LazyLock;

use log::{debug, info};
use regex::Regex;

use crate::{
    context::IngestionContext,
    error::{IngestionIssue, StoreError},
    record::{CREATED_AT, DEFAULT_MACHINE, KEY_COLUMNS, RECORD_COLUMNS, UPDATED_AT},
    store::{ColumnType, Dialect, TableStore, TargetSchema},
};

pub const DEFAULT_TABLE: &str = "mesuresqualitat";

/// `(index suffix, column)` pairs; index names are `idx_<table>_<suffix>`.
pub const INDEXES: &[(&str, &str)] = &[
    ("client", "client"),
    ("lot", "id_lot"),
    ("data_hora", "data_hora"),
    ("maquina", "maquina"),
    ("referencia_client", "id_referencia_client"),
    ("fase", "fase"),
];

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier pattern is valid")
});

pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

fn column_definition(dialect: Dialect, name: &str, column_type: ColumnType, on_create: bool) -> String {
    let mut definition = format!("{name} {}", dialect.column_type(column_type));
    if KEY_COLUMNS.contains(&name) {
        definition.push_str(" NOT NULL");
    } else if name == "maquina" {
        definition.push_str(&format!(" DEFAULT '{DEFAULT_MACHINE}'"));
    } else if (name == CREATED_AT || name == UPDATED_AT)
        && (on_create || dialect.allows_dynamic_default_on_add())
    {
        definition.push_str(" DEFAULT CURRENT_TIMESTAMP");
    }
    definition
}

pub fn create_table_sql(dialect: Dialect, table: &str) -> String {
    let mut lines = RECORD_COLUMNS
        .iter()
        .map(|(name, column_type)| format!("    {}", column_definition(dialect, name, *column_type, true)))
        .collect::<Vec<_>>();
    lines.push(format!("    PRIMARY KEY ({})", KEY_COLUMNS.join(", ")));
    format!("CREATE TABLE IF NOT EXISTS {table} (\n{}\n)", lines.join(",\n"))
}

pub fn add_column_sql(dialect: Dialect, table: &str, name: &str, column_type: ColumnType) -> String {
    format!(
        "ALTER TABLE {table} ADD COLUMN {}",
        column_definition(dialect, name, column_type, false)
    )
}

pub fn index_statements(table: &str) -> Vec<String> {
    INDEXES
        .iter()
        .map(|(suffix, column)| {
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_{suffix} ON {table} ({column})")
        })
        .collect()
}

/// Full DDL for a fresh table, as printed by `gompc-ingest schema`.
pub fn ddl(dialect: Dialect, table: &str) -> Vec<String> {
    let mut statements = vec![create_table_sql(dialect, table)];
    statements.extend(index_statements(table));
    statements
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaState {
    Unknown,
    Absent,
    Present(TargetSchema),
}

#[derive(Debug)]
pub struct SchemaSynchronizer {
    table: String,
    state: SchemaState,
}

impl SchemaSynchronizer {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            state: SchemaState::Unknown,
        }
    }

    pub fn state(&self) -> &SchemaState {
        &self.state
    }

    /// Brings the table up to the record column set and returns the live schema.
    ///
    /// Failing `ALTER`/`CREATE INDEX` statements are recorded in `ctx` and
    /// skipped. Failing to read the schema or to create a missing table is
    /// returned as an error since nothing can be written afterwards.
    pub fn synchronize(
        &mut self,
        store: &mut dyn TableStore,
        ctx: &mut IngestionContext,
    ) -> Result<TargetSchema, StoreError> {
        let dialect = store.dialect();
        let tag = ctx.tag();

        self.state = match store.describe_table(&self.table)? {
            Some(schema) => SchemaState::Present(schema),
            None => SchemaState::Absent,
        };

        match &self.state {
            SchemaState::Absent => {
                info!("[{tag}] Creating table {}", self.table);
                store.execute(&create_table_sql(dialect, &self.table))?;
            }
            SchemaState::Present(live) => {
                let missing = RECORD_COLUMNS
                    .iter()
                    .filter(|(name, _)| !live.has_column(name))
                    .collect::<Vec<_>>();
                if missing.is_empty() {
                    debug!("[{tag}] Table {} already has every column", self.table);
                }
                for (name, column_type) in missing {
                    let statement = add_column_sql(dialect, &self.table, name, *column_type);
                    info!("[{tag}] Adding column {name} to {}", self.table);
                    if let Err(err) = store.execute(&statement) {
                        ctx.record(IngestionIssue::Schema {
                            statement,
                            message: err.to_string(),
                        });
                    }
                }
            }
            SchemaState::Unknown => {}
        }

        for statement in index_statements(&self.table) {
            debug!("[{tag}] {statement}");
            if let Err(err) = store.execute(&statement) {
                ctx.record(IngestionIssue::Schema {
                    statement,
                    message: err.to_string(),
                });
            }
        }

        let live = store
            .describe_table(&self.table)?
            .unwrap_or_else(|| TargetSchema {
                table: self.table.clone(),
                columns: Vec::new(),
            });
        self.state = SchemaState::Present(live.clone());
        Ok(live)
    }
}
