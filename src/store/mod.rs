//! Database seam shared by schema synchronization and upserts.
//!
//! Everything above this module speaks [`TableStore`]; the two backends differ
//! only in DDL spelling, placeholder syntax, bind-parameter limits and how they
//! list a table's columns.

mod postgres;
mod sqlite;

pub use self::postgres::PostgresStore;
pub use self::sqlite::SqliteStore;

use std::{fmt, path::PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Storage format used for timestamps in backends without a native type.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

/// Logical column type of a persisted measurement attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text(u32),
    Numeric,
    Timestamp,
    Boolean,
}

impl Dialect {
    pub fn name(self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "sqlite",
        }
    }

    /// Bind parameters allowed in one statement.
    pub fn max_params(self) -> usize {
        match self {
            Dialect::Postgres => 65_535,
            Dialect::Sqlite => 32_766,
        }
    }

    pub fn column_type(self, column_type: ColumnType) -> String {
        match (self, column_type) {
            (Dialect::Postgres, ColumnType::Text(width)) => format!("character varying({width})"),
            (Dialect::Postgres, ColumnType::Numeric) => "numeric(15,6)".to_string(),
            (Dialect::Postgres, ColumnType::Timestamp) => "timestamp without time zone".to_string(),
            (Dialect::Postgres, ColumnType::Boolean) => "boolean".to_string(),
            (Dialect::Sqlite, ColumnType::Text(_) | ColumnType::Timestamp) => "TEXT".to_string(),
            (Dialect::Sqlite, ColumnType::Numeric) => "REAL".to_string(),
            (Dialect::Sqlite, ColumnType::Boolean) => "INTEGER".to_string(),
        }
    }

    /// 1-based placeholder. PostgreSQL placeholders carry an explicit cast so
    /// the driver binds a known type regardless of the column's declared one.
    pub fn placeholder(self, index: usize, column_type: ColumnType) -> String {
        match self {
            Dialect::Postgres => {
                let cast = match column_type {
                    ColumnType::Text(_) => "text",
                    ColumnType::Numeric => "double precision",
                    ColumnType::Timestamp => "timestamp",
                    ColumnType::Boolean => "boolean",
                };
                format!("${index}::{cast}")
            }
            Dialect::Sqlite => format!("?{index}"),
        }
    }

    /// SQLite rejects non-constant defaults in `ALTER TABLE ADD COLUMN`.
    pub fn allows_dynamic_default_on_add(self) -> bool {
        matches!(self, Dialect::Postgres)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A bound value. Every variant is nullable.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(Option<String>),
    Float(Option<f64>),
    Bool(Option<bool>),
    Timestamp(Option<NaiveDateTime>),
}

impl SqlValue {
    /// Display form used by console tables and CSV export.
    pub fn render(&self) -> String {
        match self {
            SqlValue::Text(Some(text)) => text.clone(),
            SqlValue::Float(Some(value)) => format!("{value:.6}"),
            SqlValue::Bool(Some(flag)) => flag.to_string(),
            SqlValue::Timestamp(Some(ts)) => ts.format(TIMESTAMP_FORMAT).to_string(),
            _ => String::new(),
        }
    }
}

/// One SQL statement with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveColumn {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// Column set of an existing table as the database reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSchema {
    pub table: String,
    pub columns: Vec<LiveColumn>,
}

impl TargetSchema {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns
            .iter()
            .any(|column| column.name.eq_ignore_ascii_case(name))
    }
}

pub trait TableStore {
    fn dialect(&self) -> Dialect;

    /// `None` when the table does not exist.
    fn describe_table(&mut self, table: &str) -> Result<Option<TargetSchema>, StoreError>;

    /// Runs parameterless SQL, possibly several `;`-separated statements.
    fn execute(&mut self, sql: &str) -> Result<(), StoreError>;

    /// Runs every statement in one transaction; nothing persists on error.
    /// Returns the summed affected-row count.
    fn write_atomically(&mut self, statements: &[Statement]) -> Result<u64, StoreError>;

    fn count_rows(&mut self, table: &str) -> Result<u64, StoreError>;
}

/// Where the measurement table lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DatabaseTarget {
    Postgres { url: String },
    Sqlite { path: PathBuf },
}

impl DatabaseTarget {
    pub const SQLITE_MEMORY: &'static str = ":memory:";

    /// Accepts `postgres://…`, `postgresql://…`, `sqlite://path` and `sqlite::memory:`.
    pub fn parse_url(url: &str) -> Result<Self, StoreError> {
        let trimmed = url.trim();
        if trimmed.starts_with("postgres://") || trimmed.starts_with("postgresql://") {
            return Ok(DatabaseTarget::Postgres {
                url: trimmed.to_string(),
            });
        }
        if trimmed.eq_ignore_ascii_case("sqlite::memory:") {
            return Ok(DatabaseTarget::Sqlite {
                path: PathBuf::from(Self::SQLITE_MEMORY),
            });
        }
        if let Some(path) = trimmed.strip_prefix("sqlite://")
            && !path.is_empty()
        {
            return Ok(DatabaseTarget::Sqlite {
                path: PathBuf::from(path),
            });
        }
        Err(StoreError::UnsupportedTarget(trimmed.to_string()))
    }

    /// Connection string with any password masked.
    pub fn describe(&self) -> String {
        match self {
            DatabaseTarget::Postgres { url } => mask_password(url),
            DatabaseTarget::Sqlite { path } => format!("sqlite://{}", path.display()),
        }
    }

    pub fn connect(&self) -> Result<Box<dyn TableStore>, StoreError> {
        match self {
            DatabaseTarget::Postgres { url } => Ok(Box::new(PostgresStore::connect(url)?)),
            DatabaseTarget::Sqlite { path } => Ok(Box::new(SqliteStore::open(path)?)),
        }
    }
}

fn mask_password(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.split_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => url.to_string(),
    }
}
