use std::sync::Arc;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Acquire, MySql, MySqlPool};

use crate::config::{self, ConfigError};
use crate::row::LogRow;
use crate::store::{DataSource, StoreConnection, StoreError, COLUMNS, UPDATE_COLUMNS};

/// MySQL-backed store writing one batch per transaction.
///
/// The destination table is assumed to exist with the eighteen columns
/// listed in [`COLUMNS`] and a unique index over
/// `(service, dayId, messageKey, messageNum)`:
///
/// ```sql
/// CREATE TABLE log_events (
///     dayId        INT          NOT NULL,
///     dayKey       INT          NOT NULL,
///     service      VARCHAR(100) NOT NULL,
///     level        INT          NOT NULL,
///     levelName    VARCHAR(10)  NOT NULL,
///     category     VARCHAR(200) NOT NULL,
///     className    VARCHAR(200) NOT NULL,
///     method       VARCHAR(200) NOT NULL,
///     lineNumber   INT          NOT NULL,
///     messageKey   VARCHAR(100),
///     message      VARCHAR(255),
///     error        TEXT         NOT NULL,
///     buildVersion VARCHAR(50)  NOT NULL,
///     machine      VARCHAR(100) NOT NULL,
///     machineIp    VARCHAR(45)  NOT NULL,
///     messageNum   INT          NOT NULL,
///     timestamp    DATETIME(3)  NOT NULL,
///     lastModified BIGINT       NOT NULL,
///     UNIQUE KEY log_events_natural_key (service, dayId, messageKey, messageNum)
/// );
/// ```
///
/// Rows that land on an existing key are upserted through
/// `ON DUPLICATE KEY UPDATE`, rewriting the columns in
/// [`UPDATE_COLUMNS`] and keeping the rest.
pub struct MySqlStore {
    pool: MySqlPool,
    insert_sql: Arc<str>,
}

impl MySqlStore {
    /// Creates a store over an existing connection pool.
    ///
    /// **Parameters**
    /// - `pool`: connected [`MySqlPool`]; the store acquires one
    ///   connection per batch and returns it to the pool afterwards.
    /// - `table`: destination table name. Validated against a strict
    ///   identifier charset because it is spliced into the statement text.
    ///
    /// **Returns**
    /// The store, or [`ConfigError::InvalidTable`] when the table name
    /// contains anything but ASCII alphanumerics, `_` or `.`.
    pub fn new(pool: MySqlPool, table: &str) -> Result<Self, ConfigError> {
        config::validate_table(table)?;
        Ok(MySqlStore {
            pool,
            insert_sql: upsert_sql(table).into(),
        })
    }
}

#[async_trait]
impl DataSource for MySqlStore {
    async fn acquire(&self) -> Result<Box<dyn StoreConnection>, StoreError> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StoreError::Acquire(e.to_string()))?;
        Ok(Box::new(MySqlConnection {
            conn,
            insert_sql: Arc::clone(&self.insert_sql),
        }))
    }
}

struct MySqlConnection {
    conn: PoolConnection<MySql>,
    insert_sql: Arc<str>,
}

#[async_trait]
impl StoreConnection for MySqlConnection {
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
        .map(|c| format!("`{}`", c))
        .collect::<Vec<_>>()
        .join(", ");
    let params = vec!["?"; COLUMNS.len()].join(", ");
    let updates = UPDATE_COLUMNS
        .iter()
        .map(|c| format!("`{0}` = VALUES(`{0}`)", c))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
        table, columns, params, updates
    )
}
