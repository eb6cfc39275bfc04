use log::debug;
use postgres::{Client, NoTls, types::ToSql};

use super::{Dialect, LiveColumn, SqlValue, Statement, TableStore, TargetSchema};
use crate::error::StoreError;

const DESCRIBE_SQL: &str = "SELECT column_name::text, data_type::text, is_nullable::text \
     FROM information_schema.columns \
     WHERE table_schema = current_schema() AND table_name::text = $1 \
     ORDER BY ordinal_position";

/// Production backend over the synchronous `postgres` client.
pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    pub fn connect(url: &str) -> Result<Self, StoreError> {
        let mut client = Client::connect(url, NoTls)?;
        client.batch_execute("SET CLIENT_ENCODING TO 'UTF8'")?;
        debug!("PostgreSQL session ready");
        Ok(Self { client })
    }
}

fn to_param(value: &SqlValue) -> Box<dyn ToSql + Sync> {
    match value {
        SqlValue::Text(v) => Box::new(v.clone()),
        SqlValue::Float(v) => Box::new(*v),
        SqlValue::Bool(v) => Box::new(*v),
        SqlValue::Timestamp(v) => Box::new(*v),
    }
}

impl TableStore for PostgresStore {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn describe_table(&mut self, table: &str) -> Result<Option<TargetSchema>, StoreError> {
        // Unquoted identifiers are folded to lower case on creation.
        let rows = self.client.query(DESCRIBE_SQL, &[&table.to_lowercase()])?;
        if rows.is_empty() {
            return Ok(None);
        }
        let columns = rows
            .iter()
            .map(|row| {
                let nullable: String = row.get(2);
                LiveColumn {
                    name: row.get(0),
                    data_type: row.get(1),
                    nullable: nullable.eq_ignore_ascii_case("YES"),
                }
            })
            .collect();
        Ok(Some(TargetSchema {
            table: table.to_string(),
            columns,
        }))
    }

    fn execute(&mut self, sql: &str) -> Result<(), StoreError> {
        self.client.batch_execute(sql)?;
        Ok(())
    }

    fn write_atomically(&mut self, statements: &[Statement]) -> Result<u64, StoreError> {
        let mut tx = self.client.transaction()?;
        let mut affected = 0u64;
        for statement in statements {
            let boxed = statement.params.iter().map(to_param).collect::<Vec<_>>();
            let params = boxed
                .iter()
                .map(|param| param.as_ref() as &(dyn ToSql + Sync))
                .collect::<Vec<_>>();
            affected += tx.execute(statement.sql.as_str(), &params)?;
        }
        tx.commit()?;
        Ok(affected)
    }

    fn count_rows(&mut self, table: &str) -> Result<u64, StoreError> {
        let row = self
            .client
            .query_one(&format!("SELECT COUNT(*) FROM {table}"), &[])?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }
}
