//! Batched, idempotent writes keyed by `(id_referencia_some, id_element)`.

use itertools::Itertools;
use log::info;

use crate::{
    context::IngestionContext,
    error::IngestionIssue,
    normalize::truncate_chars,
    record::{CREATED_AT, KEY_COLUMNS, MeasurementRecord, RECORD_COLUMNS},
    store::{ColumnType, Dialect, SqlValue, Statement, TableStore, TargetSchema},
};

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const MAX_BATCH_SIZE: usize = 50_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub upserted: usize,
    pub skipped: usize,
    pub batches: usize,
    pub failed_batches: usize,
}

#[derive(Debug, Clone)]
pub struct UpsertEngine {
    table: String,
    batch_size: usize,
}

impl UpsertEngine {
    pub fn new(table: impl Into<String>, batch_size: usize) -> Self {
        Self {
            table: table.into(),
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Record columns the live table also has, in record order.
    pub fn projection(schema: &TargetSchema) -> Vec<(&'static str, ColumnType)> {
        RECORD_COLUMNS
            .iter()
            .filter(|(name, _)| schema.has_column(name))
            .copied()
            .collect()
    }

    /// Statements for one batch, split so none exceeds the bind-parameter limit.
    pub fn build_statements(
        &self,
        dialect: Dialect,
        columns: &[(&'static str, ColumnType)],
        records: &[MeasurementRecord],
    ) -> Vec<Statement> {
        if columns.is_empty() {
            return Vec::new();
        }
        let rows_per_statement = (dialect.max_params() / columns.len()).max(1);
        records
            .chunks(rows_per_statement)
            .map(|chunk| self.build_statement(dialect, columns, chunk))
            .collect()
    }

    fn build_statement(
        &self,
        dialect: Dialect,
        columns: &[(&'static str, ColumnType)],
        records: &[MeasurementRecord],
    ) -> Statement {
        let mut params = Vec::with_capacity(columns.len() * records.len());
        let mut tuples = Vec::with_capacity(records.len());
        for record in records {
            let mut placeholders = Vec::with_capacity(columns.len());
            for (name, column_type) in columns {
                let value = record
                    .column_value(name)
                    .unwrap_or(SqlValue::Text(None));
                params.push(fit_to_column(value, *column_type));
                placeholders.push(dialect.placeholder(params.len(), *column_type));
            }
            tuples.push(format!("({})", placeholders.join(", ")));
        }

        let updates = columns
            .iter()
            .map(|(name, _)| *name)
            .filter(|name| !KEY_COLUMNS.contains(name) && *name != CREATED_AT)
            .map(|name| format!("{name} = excluded.{name}"))
            .join(", ");
        let action = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {updates}")
        };

        let sql = format!(
            "INSERT INTO {table} ({columns}) VALUES {values} ON CONFLICT ({keys}) {action}",
            table = self.table,
            columns = columns.iter().map(|(name, _)| *name).join(", "),
            values = tuples.join(", "),
            keys = KEY_COLUMNS.join(", "),
        );
        Statement { sql, params }
    }

    /// Writes `records` batch by batch. A failing batch is rolled back and
    /// counted as skipped; the following batches still run.
    pub fn upsert(
        &self,
        store: &mut dyn TableStore,
        schema: &TargetSchema,
        records: &[MeasurementRecord],
        ctx: &mut IngestionContext,
    ) -> UpsertOutcome {
        let mut outcome = UpsertOutcome::default();
        if records.is_empty() {
            return outcome;
        }

        let columns = Self::projection(schema);
        if let Some(missing) = KEY_COLUMNS.iter().find(|key| !schema.has_column(key)) {
            ctx.record(IngestionIssue::MissingKey {
                table: self.table.clone(),
                column: missing.to_string(),
                rows: records.len(),
            });
            outcome.skipped = records.len();
            return outcome;
        }

        let tag = ctx.tag();
        let dialect = store.dialect();
        let total_batches = records.len().div_ceil(self.batch_size);
        for (idx, batch) in records.chunks(self.batch_size).enumerate() {
            let number = idx + 1;
            outcome.batches += 1;
            let statements = self.build_statements(dialect, &columns, batch);
            match store.write_atomically(&statements) {
                Ok(_) => {
                    outcome.upserted += batch.len();
                    info!(
                        "[{tag}] Batch {number}/{total_batches} committed ({} row(s))",
                        batch.len()
                    );
                }
                Err(err) => {
                    outcome.skipped += batch.len();
                    outcome.failed_batches += 1;
                    ctx.record(IngestionIssue::Batch {
                        batch: number,
                        rows: batch.len(),
                        message: err.to_string(),
                    });
                }
            }
        }
        outcome
    }
}

/// Truncates text to the column's declared width.
fn fit_to_column(value: SqlValue, column_type: ColumnType) -> SqlValue {
    match (value, column_type) {
        (SqlValue::Text(Some(text)), ColumnType::Text(width)) => {
            SqlValue::Text(Some(truncate_chars(text, width as usize)))
        }
        (other, _) => other,
    }
}
