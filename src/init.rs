use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

use crate::config::{ConfigError, SinkConfig};
use crate::identity::HostIdentity;
use crate::layer::DbSinkLayer;
use crate::metrics::{MetricsSnapshot, SinkMetrics};
use crate::queue::EventQueue;
use crate::row::{MessageCounter, RowBuilder};
use crate::store::DataSource;
use crate::writer::{enter_writer_scope, BatchWriter};

/// Управление фоновым писателем.
///
/// Держит очередь, сигнал остановки и задачу писателя. Два способа
/// завершения:
/// - [`shutdown`](SinkHandle::shutdown): закрывает очередь, дожидается,
///   пока писатель дольёт всё накопленное, и завершает задачу.
/// - [`abort`](SinkHandle::abort): взводит сигнал остановки; писатель
///   выходит после текущей блокирующей операции, остаток очереди
///   теряется.
pub struct SinkHandle {
    queue: Arc<EventQueue>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    metrics: Arc<SinkMetrics>,
}

impl SinkHandle {
    /// Current pipeline counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stops the writer after flushing.
    ///
    /// **Behavior**
    ///
    /// Closes the queue so new events are refused, lets the writer
    /// drain and commit whatever is still buffered, then waits for the
    /// task to finish.
    pub async fn shutdown(self) {
        self.queue.close();
        if let Err(error) = self.task.await {
            tracing::warn!(error = %error, "batch writer task ended abnormally");
        }
    }

    /// Stops the writer without flushing.
    ///
    /// **Behavior**
    ///
    /// Fires the stop signal and waits for the task. The writer exits
    /// at its next blocking point; events still queued or in flight are
    /// lost.
    pub async fn abort(self) {
        self.cancel.cancel();
        if let Err(error) = self.task.await {
            tracing::warn!(error = %error, "batch writer task ended abnormally");
        }
    }
}

/// Builds the layer and starts the background writer without touching
/// the global subscriber.
///
/// **Parameters**
/// - `source`: store the writer commits batches to.
/// - `config`: service identity, queue bound, level threshold and
///   deadline settings.
///
/// **Returns**
/// The [`DbSinkLayer`] to compose into a subscriber, paired with the
/// [`SinkHandle`] controlling the writer. Fails with [`ConfigError`]
/// when `config` does not validate.
///
/// Must be called inside a Tokio runtime; the writer task is spawned
/// onto the current one.
pub fn start(
    source: Arc<dyn DataSource>,
    config: SinkConfig,
) -> Result<(DbSinkLayer, SinkHandle), ConfigError> {
    config.validate()?;

    let metrics = Arc::new(SinkMetrics::new());
    let queue = Arc::new(EventQueue::new(config.max_queue, Arc::clone(&metrics)));
    let identity = HostIdentity::resolve(config.build_version.clone());
    let rows = RowBuilder::new(
        config.service.clone(),
        identity,
        MessageCounter::new(config.max_messages_per_day),
    );
    let cancel = CancellationToken::new();
    let writer = BatchWriter::new(
        Arc::clone(&queue),
        source,
        rows,
        Arc::clone(&metrics),
        config.io_deadline,
        cancel.clone(),
    );
    let task = tokio::spawn(enter_writer_scope(writer.run()));

    let layer = DbSinkLayer::new(Arc::clone(&queue), config.max_level, Arc::clone(&metrics));
    let handle = SinkHandle {
        queue,
        cancel,
        task,
        metrics,
    };
    Ok((layer, handle))
}

/// Initializes the global `tracing` subscriber with the database sink.
///
/// **Parameters**
/// - `source`: store the writer commits batches to.
/// - `config`: [`SinkConfig`] controlling the pipeline; its
///   `enable_stdout` flag decides whether a console `fmt` layer is
///   stacked on top.
///
/// **Effects**
///
/// Installs a [`Registry`] combined with [`DbSinkLayer`] as the global
/// default subscriber, so every `tracing` event in the process is
/// observed by the layer. This is the recommended entrypoint for
/// typical services; use [`start`] to compose the layer yourself.
pub fn init_db_sink(
    source: Arc<dyn DataSource>,
    config: SinkConfig,
) -> Result<SinkHandle, ConfigError> {
    let enable_stdout = config.enable_stdout;
    let (layer, handle) = start(source, config)?;

    // Всегда подключаем слой, который пишет в базу. Дополнительно, при
    // `enable_stdout = true`, подключаем `fmt`‑слой, чтобы видеть
    // события в консоли. Для совместимости типов собираем subscriber в
    // двух вариантах.
    if enable_stdout {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber).expect("set global subscriber");
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber).expect("set global subscriber");
    }
    Ok(handle)
}
