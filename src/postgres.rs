use std::sync::Arc;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Acquire, PgPool, Postgres};

use crate::config::{self, ConfigError};
use crate::row::LogRow;
use crate::store::{DataSource, StoreConnection, StoreError, COLUMNS, KEY_COLUMNS, UPDATE_COLUMNS};

/// PostgreSQL-backed store writing one batch per transaction.
///
/// The destination table is assumed to exist with the eighteen columns
/// listed in [`COLUMNS`] and a unique index over
/// `(service, "dayId", "messageKey", "messageNum")`:
///
/// ```sql
/// CREATE TABLE log_events (
///     "dayId"        INTEGER      NOT NULL,
///     "dayKey"       INTEGER      NOT NULL,
///     service        VARCHAR(100) NOT NULL,
///     level          INTEGER      NOT NULL,
///     "levelName"    VARCHAR(10)  NOT NULL,
///     category       VARCHAR(200) NOT NULL,
///     "className"    VARCHAR(200) NOT NULL,
///     method         VARCHAR(200) NOT NULL,
///     "lineNumber"   INTEGER      NOT NULL,
///     "messageKey"   VARCHAR(100),
///     message        VARCHAR(255),
///     error          TEXT         NOT NULL,
///     "buildVersion" VARCHAR(50)  NOT NULL,
///     machine        VARCHAR(100) NOT NULL,
///     "machineIp"    VARCHAR(45)  NOT NULL,
///     "messageNum"   INTEGER      NOT NULL,
///     timestamp      TIMESTAMPTZ  NOT NULL,
///     "lastModified" BIGINT       NOT NULL
/// );
/// CREATE UNIQUE INDEX log_events_natural_key
///     ON log_events (service, "dayId", "messageKey", "messageNum");
/// ```
///
/// Rows that land on an existing key are upserted: the columns in
/// [`UPDATE_COLUMNS`] take the incoming values, the rest keep what is
/// already stored.
pub struct PostgresStore {
    pool: PgPool,
    insert_sql: Arc<str>,
}

impl PostgresStore {
    /// Creates a store over an existing connection pool.
    ///
    /// **Parameters**
    /// - `pool`: connected [`PgPool`]; the store acquires one connection
    ///   per batch and returns it to the pool afterwards.
    /// - `table`: destination table name. Validated against a strict
    ///   identifier charset because it is spliced into the statement text.
    ///
    /// **Returns**
    /// The store, or [`ConfigError::InvalidTable`] when the table name
    /// contains anything but ASCII alphanumerics, `_` or `.`.
    pub fn new(pool: PgPool, table: &str) -> Result<Self, ConfigError> {
        config::validate_table(table)?;
        Ok(PostgresStore {
            pool,
            insert_sql: upsert_sql(table).into(),
        })
    }
}

#[async_trait]
impl DataSource for PostgresStore {
    async fn acquire(&self) -> Result<Box<dyn StoreConnection>, StoreError> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StoreError::Acquire(e.to_string()))?;
        Ok(Box::new(PostgresConnection {
            conn,
            insert_sql: Arc::clone(&self.insert_sql),
        }))
    }
}

struct PostgresConnection {
    conn: PoolConnection<Postgres>,
    insert_sql: Arc<str>,
}

#[async_trait]
impl StoreConnection for PostgresConnection {
    async fn write_rows(&mut self, rows: &[LogRow]) -> Result<(), StoreError> {
        let mut tx = self
            .conn
            .begin()
            .await
            .map_err(|e| StoreError::Execute(e.to_string()))?;
        for row in rows {
            sqlx::query(&self.insert_sql)
                .bind(row.day_id)
                .bind(row.day_key)
                .bind(&row.service)
                .bind(row.level)
                .bind(&row.level_name)
                .bind(&row.category)
                .bind(&row.class_name)
                .bind(&row.method)
                .bind(row.line_number)
                .bind(row.message_key.as_deref())
                .bind(row.message.as_deref())
                .bind(&row.error)
                .bind(&row.build_version)
                .bind(&row.machine)
                .bind(&row.machine_ip)
                .bind(row.message_num)
                .bind(row.timestamp)
                .bind(row.last_modified)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Execute(e.to_string()))?;
        }
        tx.commit()
            .await
            .map_err(|e| StoreError::Commit(e.to_string()))
    }
}

/// Builds the parameterized upsert statement for `table`.
fn upsert_sql(table: &str) -> String {
    let columns = COLUMNS
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(", ");
    let params = (1..=COLUMNS.len())
        .map(|i| format!("${}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let key = KEY_COLUMNS
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(", ");
    let updates = UPDATE_COLUMNS
        .iter()
        .map(|c| format!("\"{0}\" = EXCLUDED.\"{0}\"", c))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}",
        table, columns, params, key, updates
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_sql_shape() {
        let sql = upsert_sql("log_events");
        assert_eq!(
            sql,
            "INSERT INTO log_events (\"dayId\", \"dayKey\", \"service\", \"level\", \
             \"levelName\", \"category\", \"className\", \"method\", \"lineNumber\", \
             \"messageKey\", \"message\", \"error\", \"buildVersion\", \"machine\", \
             \"machineIp\", \"messageNum\", \"timestamp\", \"lastModified\") \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18) \
             ON CONFLICT (\"service\", \"dayId\", \"messageKey\", \"messageNum\") \
             DO UPDATE SET \"dayKey\" = EXCLUDED.\"dayKey\", \"level\" = EXCLUDED.\"level\", \
             \"levelName\" = EXCLUDED.\"levelName\", \"category\" = EXCLUDED.\"category\", \
             \"className\" = EXCLUDED.\"className\", \"method\" = EXCLUDED.\"method\", \
             \"lineNumber\" = EXCLUDED.\"lineNumber\", \"message\" = EXCLUDED.\"message\", \
             \"error\" = EXCLUDED.\"error\", \"buildVersion\" = EXCLUDED.\"buildVersion\", \
             \"machine\" = EXCLUDED.\"machine\", \"timestamp\" = EXCLUDED.\"timestamp\", \
             \"lastModified\" = EXCLUDED.\"lastModified\"",
        );
    }

    #[test]
    fn test_update_columns_leave_key_and_ip_alone() {
        for key in KEY_COLUMNS {
            assert!(!UPDATE_COLUMNS.contains(&key));
        }
        assert!(!UPDATE_COLUMNS.contains(&"machineIp"));
        assert_eq!(UPDATE_COLUMNS.len(), COLUMNS.len() - KEY_COLUMNS.len() - 1);
    }

    #[test]
    fn test_schema_qualified_table_accepted() {
        let sql = upsert_sql("logging.log_events");
        assert!(sql.starts_with("INSERT INTO logging.log_events ("));
    }
}
