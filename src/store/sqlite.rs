use std::path::Path;

use rusqlite::{Connection, params_from_iter, types::Value};

use super::{Dialect, LiveColumn, SqlValue, Statement, TIMESTAMP_FORMAT, TableStore, TargetSchema};
use crate::error::StoreError;

/// SQLite backend for local runs; `:memory:` opens a private in-memory database.
pub struct SqliteStore {
    connection: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let connection = if path.as_os_str() == super::DatabaseTarget::SQLITE_MEMORY {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        Ok(Self { connection })
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            connection: Connection::open_in_memory()?,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

fn to_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Text(Some(text)) => Value::Text(text.clone()),
        SqlValue::Float(Some(number)) => Value::Real(*number),
        SqlValue::Bool(Some(flag)) => Value::Integer(i64::from(*flag)),
        SqlValue::Timestamp(Some(ts)) => Value::Text(ts.format(TIMESTAMP_FORMAT).to_string()),
        SqlValue::Text(None) | SqlValue::Float(None) | SqlValue::Bool(None) | SqlValue::Timestamp(None) => {
            Value::Null
        }
    }
}

impl TableStore for SqliteStore {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn describe_table(&mut self, table: &str) -> Result<Option<TargetSchema>, StoreError> {
        let mut stmt = self
            .connection
            .prepare(&format!("PRAGMA table_info({table})"))?;
        let columns = stmt
            .query_map([], |row| {
                Ok(LiveColumn {
                    name: row.get::<_, String>(1)?,
                    data_type: row.get::<_, String>(2)?,
                    nullable: row.get::<_, i64>(3)? == 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        if columns.is_empty() {
            return Ok(None);
        }
        Ok(Some(TargetSchema {
            table: table.to_string(),
            columns,
        }))
    }

    fn execute(&mut self, sql: &str) -> Result<(), StoreError> {
        self.connection.execute_batch(sql)?;
        Ok(())
    }

    fn write_atomically(&mut self, statements: &[Statement]) -> Result<u64, StoreError> {
        let tx = self.connection.transaction()?;
        let mut affected = 0u64;
        for statement in statements {
            let values = statement.params.iter().map(to_value);
            affected += tx.execute(&statement.sql, params_from_iter(values))? as u64;
        }
        tx.commit()?;
        Ok(affected)
    }

    fn count_rows(&mut self, table: &str) -> Result<u64, StoreError> {
        let count: i64 = self
            .connection
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}
