use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::row::LogRow;
use crate::store::{DataSource, StoreConnection, StoreError};

/// In-process store keeping committed rows in memory.
///
/// Stands in for a real database in tests and demos. Batches keep
/// their transactional behavior: a scripted failure discards the whole
/// batch, exactly like a rolled-back transaction.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    rows: Mutex<Vec<LogRow>>,
    batch_sizes: Mutex<Vec<usize>>,
    acquires: AtomicUsize,
    fail_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// All rows committed so far, in commit order.
    pub fn rows(&self) -> Vec<LogRow> {
        self.inner.rows.lock().clone()
    }

    /// Sizes of the committed batches, oldest first.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.inner.batch_sizes.lock().clone()
    }

    /// Number of connections handed out so far.
    pub fn acquire_count(&self) -> usize {
        self.inner.acquires.load(Ordering::SeqCst)
    }

    /// Makes the next `count` batch writes fail without committing.
    pub fn fail_next_writes(&self, count: usize) {
        self.inner.fail_writes.store(count, Ordering::SeqCst);
    }

    /// Drops every committed row and batch record.
    pub fn clear(&self) {
        self.inner.rows.lock().clear();
        self.inner.batch_sizes.lock().clear();
    }
}

#[async_trait]
impl DataSource for MemoryStore {
    async fn acquire(&self) -> Result<Box<dyn StoreConnection>, StoreError> {
        self.inner.acquires.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MemoryConnection {
    inner: Arc<MemoryInner>,
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn write_rows(&mut self, rows: &[LogRow]) -> Result<(), StoreError> {
        if take_one(&self.inner.fail_writes) {
            return Err(StoreError::Execute("scripted write failure".to_string()));
        }
        self.inner.rows.lock().extend_from_slice(rows);
        self.inner.batch_sizes.lock().push(rows.len());
        Ok(())
    }
}

/// Decrements `counter` if it is above zero, reporting whether it was.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::LogEvent;
    use crate::identity::HostIdentity;
    use crate::row::{MessageCounter, RowBuilder};

    fn sample_rows(count: usize) -> Vec<LogRow> {
        let builder = RowBuilder::new(
            "orders",
            HostIdentity {
                machine: "host-1".to_string(),
                machine_ip: "10.0.0.5".to_string(),
                build_version: "1.0.0".to_string(),
            },
            MessageCounter::new(1_000),
        );
        (0..count)
            .map(|i| {
                builder.build(&LogEvent::new(
                    crate::event::Severity::Info,
                    "app::orders",
                    format!("row {}", i),
                ))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_commits_batches_in_order() {
        let store = MemoryStore::new();
        let mut conn = store.acquire().await.unwrap();
        conn.write_rows(&sample_rows(2)).await.unwrap();
        conn.write_rows(&sample_rows(3)).await.unwrap();

        assert_eq!(store.rows().len(), 5);
        assert_eq!(store.batch_sizes(), vec![2, 3]);
        assert_eq!(store.acquire_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failure_discards_whole_batch() {
        let store = MemoryStore::new();
        store.fail_next_writes(1);

        let mut conn = store.acquire().await.unwrap();
        let err = conn.write_rows(&sample_rows(4)).await.unwrap_err();
        assert!(matches!(err, StoreError::Execute(_)));
        assert!(store.rows().is_empty());

        conn.write_rows(&sample_rows(1)).await.unwrap();
        assert_eq!(store.batch_sizes(), vec![1]);
    }
}
