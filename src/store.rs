use crate::row::LogRow;
use async_trait::async_trait;
use thiserror::Error;

/// Destination table columns, in the order every store binds them.
pub const COLUMNS: [&str; 18] = [
    "dayId",
    "dayKey",
    "service",
    "level",
    "levelName",
    "category",
    "className",
    "method",
    "lineNumber",
    "messageKey",
    "message",
    "error",
    "buildVersion",
    "machine",
    "machineIp",
    "messageNum",
    "timestamp",
    "lastModified",
];

/// Natural key the destination table upserts on.
pub const KEY_COLUMNS: [&str; 4] = ["service", "dayId", "messageKey", "messageNum"];

/// Columns rewritten when an upsert hits an existing row. The key
/// columns and `machineIp` keep their stored values.
pub const UPDATE_COLUMNS: [&str; 13] = [
    "dayKey",
    "level",
    "levelName",
    "category",
    "className",
    "method",
    "lineNumber",
    "message",
    "error",
    "buildVersion",
    "machine",
    "timestamp",
    "lastModified",
];

/// Failure classes surfaced by a store implementation.
///
/// Carried as plain strings so that implementations outside this crate
/// (including test doubles) can construct them without depending on any
/// particular database driver's error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A connection could not be obtained from the pool.
    #[error("connection acquire failed: {0}")]
    Acquire(String),

    /// Preparing or executing the batch statement failed.
    #[error("batch execute failed: {0}")]
    Execute(String),

    /// The batch transaction could not be committed.
    #[error("transaction commit failed: {0}")]
    Commit(String),
}

/// Pooled source of store connections for the batch writer.
///
/// Implementations wrap a concrete connection pool (Postgres, MySQL, an
/// in-memory recorder, ...). The writer acquires a connection per burst
/// of batches and holds it while the queue keeps refilling, so `acquire`
/// should hand out pooled connections rather than dialing new ones.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Check a connection out of the pool.
    ///
    /// **Returns**
    /// - `Ok(connection)`: a live connection the writer will use for one
    ///   or more consecutive batches and then drop.
    /// - `Err(..)`: the pool is exhausted or the server is unreachable.
    ///   The writer treats this as a failed batch: the drained events
    ///   are discarded and the loop continues.
    async fn acquire(&self) -> Result<Box<dyn StoreConnection>, StoreError>;
}

/// A live store connection owned by the batch writer.
///
/// Dropping the value returns the underlying connection to its pool;
/// there is no explicit release call.
#[async_trait]
pub trait StoreConnection: Send {
    /// Persist one batch of rows atomically.
    ///
    /// **Parameters**
    /// - `rows`: the transformed batch, in arrival order.
    ///
    /// **Returns**
    /// - `Ok(())` only after every row was executed and the transaction
    ///   committed. Re-delivery of an identical row must be absorbed by
    ///   the destination's natural-key upsert.
    /// - `Err(..)` if any row or the commit failed; the transaction must
    ///   leave none of the batch visible.
    async fn write_rows(&mut self, rows: &[LogRow]) -> Result<(), StoreError>;
}
