use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the whole pipeline, shared between the layer, the queue
/// and the writer. Cheap to update from any thread; read via
/// [`SinkMetrics::snapshot`].
#[derive(Debug, Default)]
pub struct SinkMetrics {
    events_seen: AtomicU64,
    events_excluded: AtomicU64,
    events_enqueued: AtomicU64,
    events_dropped: AtomicU64,
    batches_committed: AtomicU64,
    batches_failed: AtomicU64,
    rows_written: AtomicU64,
    rows_discarded: AtomicU64,
}

impl SinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_event_seen(&self) {
        self.events_seen.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_event_excluded(&self) {
        self.events_excluded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_event_enqueued(&self) {
        self.events_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_batch_committed(&self, rows: u64) {
        self.batches_committed.fetch_add(1, Ordering::Relaxed);
        self.rows_written.fetch_add(rows, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_batch_failed(&self, rows: u64) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        self.rows_discarded.fetch_add(rows, Ordering::Relaxed);
    }

    /// Consistent-enough point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_seen: self.events_seen.load(Ordering::Relaxed),
            events_excluded: self.events_excluded.load(Ordering::Relaxed),
            events_enqueued: self.events_enqueued.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            rows_discarded: self.rows_discarded.load(Ordering::Relaxed),
        }
    }
}

/// Plain-number view of [`SinkMetrics`], safe to copy around and export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Events the layer observed before any filtering.
    pub events_seen: u64,
    /// Events rejected by the admission policy (level or self-origin).
    pub events_excluded: u64,
    /// Events accepted into the queue.
    pub events_enqueued: u64,
    /// Events discarded because the queue was at capacity.
    pub events_dropped: u64,
    /// Batches committed to the store.
    pub batches_committed: u64,
    /// Batches discarded after a store failure.
    pub batches_failed: u64,
    /// Rows durably written across all committed batches.
    pub rows_written: u64,
    /// Rows lost with failed batches.
    pub rows_discarded: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_recordings() {
        let metrics = SinkMetrics::new();
        metrics.record_event_seen();
        metrics.record_event_seen();
        metrics.record_event_enqueued();
        metrics.record_event_dropped();
        metrics.record_batch_committed(7);
        metrics.record_batch_failed(3);

        let snap = metrics.snapshot();
        assert_eq!(snap.events_seen, 2);
        assert_eq!(snap.events_enqueued, 1);
        assert_eq!(snap.events_dropped, 1);
        assert_eq!(snap.batches_committed, 1);
        assert_eq!(snap.rows_written, 7);
        assert_eq!(snap.batches_failed, 1);
        assert_eq!(snap.rows_discarded, 3);
        assert_eq!(snap.events_excluded, 0);
    }

    #[test]
    fn test_default_snapshot_is_zeroed() {
        assert_eq!(SinkMetrics::new().snapshot(), MetricsSnapshot::default());
    }
}
