use crate::event::{CallerFrame, ErrorInfo, LogEvent, Severity};
use crate::metrics::SinkMetrics;
use crate::queue::EventQueue;
use crate::writer::in_writer_scope;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Targets underneath this prefix belong to the sink itself and are
/// never admitted, so the pipeline's own warnings cannot loop back in.
const SELF_TARGET: &str = env!("CARGO_CRATE_NAME");

/// `tracing_subscriber` layer that converts observed events into
/// [`LogEvent`]s and hands them to the bounded queue.
///
/// By default only `ERROR` events are captured. Everything past the
/// queue happens on the background writer task; an event's producer
/// thread never waits on the database.
pub struct DbSinkLayer {
    queue: Arc<EventQueue>,
    max_level: Level,
    metrics: Arc<SinkMetrics>,
}

impl DbSinkLayer {
    pub(crate) fn new(queue: Arc<EventQueue>, max_level: Level, metrics: Arc<SinkMetrics>) -> Self {
        DbSinkLayer {
            queue,
            max_level,
            metrics,
        }
    }

    /// Hand an already-built event to the pipeline.
    ///
    /// Skips the level threshold (the caller made the event on purpose)
    /// but still applies the self-exclusion rules.
    pub fn submit(&self, event: LogEvent) {
        self.metrics.record_event_seen();
        self.admit(event);
    }

    fn admit(&self, event: LogEvent) {
        if is_self_target(&event.category) || in_writer_scope() {
            self.metrics.record_event_excluded();
            return;
        }
        self.queue.push(event);
    }
}

impl<S> Layer<S> for DbSinkLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event, _ctx: Context<'_, S>) {
        self.metrics.record_event_seen();
        let meta = event.metadata();
        if *meta.level() > self.max_level {
            self.metrics.record_event_excluded();
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let error = visitor.error.map(|mut chain| {
            chain.capture_backtrace();
            chain
        });

        let caller = meta.module_path().map(|module| CallerFrame {
            module: module.to_string(),
            file: meta.file().unwrap_or_default().to_string(),
            line: meta.line().unwrap_or(0),
        });

        self.admit(LogEvent {
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            severity: Severity::from_tracing(meta.level()),
            category: meta.target().to_string(),
            thread: std::thread::current()
                .name()
                .unwrap_or_default()
                .to_string(),
            message: compose_message(visitor.message, &visitor.fields),
            error,
            caller,
        });
    }
}

fn is_self_target(target: &str) -> bool {
    target
        .strip_prefix(SELF_TARGET)
        .map_or(false, |rest| rest.is_empty() || rest.starts_with("::"))
}

/// Folds an event's non-message fields into the message text, since the
/// destination table has a single message column.
fn compose_message(message: Option<String>, fields: &BTreeMap<String, Value>) -> Option<String> {
    if fields.is_empty() {
        return message;
    }
    let mut out = message.unwrap_or_default();
    for (name, value) in fields {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(name);
        out.push('=');
        match value {
            Value::String(text) => out.push_str(text),
            other => out.push_str(&other.to_string()),
        }
    }
    Some(out)
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: BTreeMap<String, Value>,
    error: Option<ErrorInfo>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields
                .insert(field.name().to_string(), Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        if self.error.is_none() {
            self.error = Some(ErrorInfo::from_error(value));
        } else {
            self.fields
                .insert(field.name().to_string(), Value::String(value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            self.fields
                .insert(field.name().to_string(), Value::String(format!("{:?}", value)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::enter_writer_scope;
    use std::error::Error as StdError;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    fn pipeline(max_level: Level) -> (Arc<EventQueue>, Arc<SinkMetrics>, DbSinkLayer) {
        let metrics = Arc::new(SinkMetrics::new());
        let queue = Arc::new(EventQueue::new(32, Arc::clone(&metrics)));
        let layer = DbSinkLayer::new(Arc::clone(&queue), max_level, Arc::clone(&metrics));
        (queue, metrics, layer)
    }

    #[test]
    fn test_error_event_is_captured_with_fields() {
        let (queue, _, layer) = pipeline(Level::ERROR);
        let subscriber = Registry::default().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::error!(target: "app::payments", user_id = 7, "payment failed");
        });

        let batch = queue.try_drain().unwrap();
        assert_eq!(batch.len(), 1);
        let event = &batch[0];
        assert_eq!(event.category, "app::payments");
        assert_eq!(event.severity, Severity::Error);
        assert_eq!(event.message.as_deref(), Some("payment failed user_id=7"));
        let caller = event.caller.as_ref().unwrap();
        assert!(caller.module.contains("layer"));
        assert!(caller.line > 0);
    }

    #[test]
    fn test_events_below_threshold_are_excluded() {
        let (queue, metrics, layer) = pipeline(Level::ERROR);
        let subscriber = Registry::default().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "app::payments", "not severe enough");
        });

        assert!(queue.is_empty());
        let snap = metrics.snapshot();
        assert_eq!(snap.events_seen, 1);
        assert_eq!(snap.events_excluded, 1);
    }

    #[test]
    fn test_threshold_can_be_widened() {
        let (queue, _, layer) = pipeline(Level::WARN);
        let subscriber = Registry::default().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "app::payments", "now admitted");
        });

        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_own_target_is_never_admitted() {
        let (queue, metrics, layer) = pipeline(Level::ERROR);
        let subscriber = Registry::default().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::error!(target: "tracing_db_sink::queue", "queue full, discarding");
        });

        assert!(queue.is_empty());
        assert_eq!(metrics.snapshot().events_excluded, 1);
    }

    #[test]
    fn test_prefix_match_requires_module_separator() {
        assert!(is_self_target("tracing_db_sink"));
        assert!(is_self_target("tracing_db_sink::writer"));
        assert!(!is_self_target("tracing_db_sink_extras"));
        assert!(!is_self_target("app::tracing"));
    }

    #[tokio::test]
    async fn test_writer_scope_events_are_never_admitted() {
        let (queue, metrics, layer) = pipeline(Level::ERROR);
        let subscriber = Registry::default().with(layer);

        enter_writer_scope(async move {
            tracing::subscriber::with_default(subscriber, || {
                tracing::error!(target: "app::payments", "emitted by the writer");
            });
        })
        .await;

        assert!(queue.is_empty());
        assert_eq!(metrics.snapshot().events_excluded, 1);
    }

    #[test]
    fn test_error_field_becomes_error_chain() {
        let (queue, _, layer) = pipeline(Level::ERROR);
        let subscriber = Registry::default().with(layer);

        let failure = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer reset");
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!(
                target: "app::gateway",
                error = &failure as &(dyn StdError + 'static),
                "upstream call failed"
            );
        });

        let batch = queue.try_drain().unwrap();
        let chain = batch[0].error.as_ref().unwrap();
        assert_eq!(chain.message, "peer reset");
        assert_eq!(batch[0].message.as_deref(), Some("upstream call failed"));
    }

    #[test]
    fn test_submit_bypasses_level_but_not_exclusion() {
        let (queue, metrics, layer) = pipeline(Level::ERROR);

        layer.submit(LogEvent::new(Severity::Info, "app::jobs", "manual event"));
        assert_eq!(queue.len(), 1);

        layer.submit(LogEvent::new(Severity::Error, "tracing_db_sink::writer", "loop"));
        assert_eq!(queue.len(), 1);
        assert_eq!(metrics.snapshot().events_excluded, 1);
    }

    #[test]
    fn test_compose_message_orders_fields_by_name() {
        let mut fields = BTreeMap::new();
        fields.insert("kind".to_string(), Value::String("io".to_string()));
        fields.insert("code".to_string(), Value::from(5));
        let text = compose_message(Some("read failed".to_string()), &fields);
        assert_eq!(text.as_deref(), Some("read failed code=5 kind=io"));
    }

    #[test]
    fn test_compose_message_without_base_message() {
        let mut fields = BTreeMap::new();
        fields.insert("attempt".to_string(), Value::from(3));
        assert_eq!(compose_message(None, &fields).as_deref(), Some("attempt=3"));
        assert_eq!(compose_message(None, &BTreeMap::new()), None);
    }
}
