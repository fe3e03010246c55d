use async_trait::async_trait;

use crate::row::LogRow;
use crate::store::{DataSource, StoreConnection, StoreError};

/// A store that simply drops every batch.
///
/// Useful for measuring the overhead of the layer and writer without
/// any external I/O, and for unit tests that don't care about
/// persistence.
#[derive(Clone, Default)]
pub struct NoopStore;

#[async_trait]
impl DataSource for NoopStore {
    async fn acquire(&self) -> Result<Box<dyn StoreConnection>, StoreError> {
        Ok(Box::new(NoopConnection))
    }
}

struct NoopConnection;

#[async_trait]
impl StoreConnection for NoopConnection {
    async fn write_rows(&mut self, _rows: &[LogRow]) -> Result<(), StoreError> {
        Ok(())
    }
}
