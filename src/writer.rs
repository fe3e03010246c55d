use crate::event::LogEvent;
use crate::metrics::SinkMetrics;
use crate::queue::EventQueue;
use crate::row::{LogRow, RowBuilder};
use crate::store::{DataSource, StoreError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

tokio::task_local! {
    static WRITER_SCOPE: ();
}

/// True while executing inside the batch writer's own task. The layer
/// uses this to keep the writer's diagnostics (including the database
/// driver's own logging) from re-entering the pipeline.
pub(crate) fn in_writer_scope() -> bool {
    WRITER_SCOPE.try_with(|_| ()).is_ok()
}

/// Runs a future with the writer-context mark set.
pub(crate) async fn enter_writer_scope<F: Future>(fut: F) -> F::Output {
    WRITER_SCOPE.scope((), fut).await
}

#[derive(Debug, Error)]
enum WriteError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("store call exceeded the {0:?} deadline")]
    Deadline(Duration),

    #[error("shutdown requested during store i/o")]
    Shutdown,
}

/// The single background worker of the pipeline.
///
/// Each iteration blocks on the queue, then writes everything it got in
/// one transaction. While a batch was committing more events may have
/// arrived; those are drained and written on the same connection, and
/// the connection is released only once the queue is found empty.
///
/// Any store failure discards the in-flight batch: the events are
/// gone, a warning is emitted, and the loop moves on. Nothing is
/// retried and nothing is re-queued.
pub struct BatchWriter {
    queue: Arc<EventQueue>,
    source: Arc<dyn DataSource>,
    rows: RowBuilder,
    metrics: Arc<SinkMetrics>,
    io_deadline: Duration,
    cancel: CancellationToken,
}

impl BatchWriter {
    pub(crate) fn new(
        queue: Arc<EventQueue>,
        source: Arc<dyn DataSource>,
        rows: RowBuilder,
        metrics: Arc<SinkMetrics>,
        io_deadline: Duration,
        cancel: CancellationToken,
    ) -> Self {
        BatchWriter {
            queue,
            source,
            rows,
            metrics,
            io_deadline,
            cancel,
        }
    }

    /// Worker loop. Exits when the queue is closed and drained, or when
    /// the stop signal fires; the signal is re-checked after every
    /// blocking point.
    pub(crate) async fn run(self) {
        tracing::info!("batch writer started");
        loop {
            let batch = tokio::select! {
                _ = self.cancel.cancelled() => break,
                drained = self.queue.drain() => match drained {
                    Some(batch) => batch,
                    None => break,
                },
            };
            self.write_batch(batch).await;
            if self.cancel.is_cancelled() {
                break;
            }
        }
        tracing::info!("batch writer stopped");
    }

    /// One writer iteration: acquire a connection, then keep committing
    /// batches while the queue refills, releasing the connection only
    /// when the queue comes up empty.
    async fn write_batch(&self, first: Vec<LogEvent>) {
        let mut pending = first;
        let mut conn = match self.guarded(self.source.acquire()).await {
            Ok(conn) => conn,
            Err(error) => {
                self.discard(pending.len(), &error);
                return;
            }
        };
        loop {
            let rows: Vec<LogRow> = pending.iter().map(|event| self.rows.build(event)).collect();
            if let Err(error) = self.guarded(conn.write_rows(&rows)).await {
                self.discard(rows.len(), &error);
                return;
            }
            self.metrics.record_batch_committed(rows.len() as u64);
            tracing::debug!(rows = rows.len(), "log batch committed");

            match self.queue.try_drain() {
                Some(more) => pending = more,
                None => return,
            }
        }
    }

    /// Applies the I/O deadline and the stop signal to a store call.
    async fn guarded<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, WriteError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(WriteError::Shutdown),
            timed = tokio::time::timeout(self.io_deadline, fut) => match timed {
                Ok(result) => result.map_err(WriteError::from),
                Err(_) => Err(WriteError::Deadline(self.io_deadline)),
            },
        }
    }

    fn discard(&self, lost: usize, error: &WriteError) {
        self.metrics.record_batch_failed(lost as u64);
        tracing::warn!(
            error = %error,
            lost_events = lost,
            "failed to write a log batch; these events are thrown away"
        );
    }
}
