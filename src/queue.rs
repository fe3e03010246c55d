use crate::event::LogEvent;
use crate::metrics::SinkMetrics;
use parking_lot::Mutex;
use std::mem;
use std::sync::Arc;
use tokio::sync::Notify;

/// Bounded FIFO buffer between producer threads and the batch writer.
///
/// `push` never blocks beyond the mutex critical section; over-capacity
/// events are discarded with a warning. `drain` hands the writer the
/// entire buffered contents in one swap, so producers are never stalled
/// by an in-flight batch and the lock is never held across I/O.
pub struct EventQueue {
    state: Mutex<State>,
    notify: Notify,
    capacity: usize,
    metrics: Arc<SinkMetrics>,
}

#[derive(Default)]
struct State {
    events: Vec<LogEvent>,
    closed: bool,
}

impl EventQueue {
    pub fn new(capacity: usize, metrics: Arc<SinkMetrics>) -> Self {
        EventQueue {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
            metrics,
        }
    }

    /// Appends an event unless the queue is full or closed.
    ///
    /// Returns whether the event was accepted. Rejections are counted;
    /// a capacity rejection additionally warns with the dropped message.
    pub fn push(&self, event: LogEvent) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            self.metrics.record_event_dropped();
            tracing::debug!("sink is shut down, discarding log event");
            return false;
        }
        if state.events.len() >= self.capacity {
            drop(state);
            self.metrics.record_event_dropped();
            tracing::warn!(
                dropped_message = event.message.as_deref().unwrap_or(""),
                "log event queue full, discarding event"
            );
            return false;
        }
        state.events.push(event);
        drop(state);
        self.metrics.record_event_enqueued();
        self.notify.notify_one();
        true
    }

    /// Waits until at least one event is buffered, then takes the whole
    /// buffer. Returns `None` once the queue is closed and empty.
    pub async fn drain(&self) -> Option<Vec<LogEvent>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register for a wakeup before checking state, so a push or
            // close landing in between is not lost.
            notified.as_mut().enable();
            {
                let mut state = self.state.lock();
                if !state.events.is_empty() {
                    return Some(mem::take(&mut state.events));
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Non-blocking variant of [`EventQueue::drain`] used by the writer
    /// to pick up events that arrived while a batch was committing.
    pub fn try_drain(&self) -> Option<Vec<LogEvent>> {
        let mut state = self.state.lock();
        if state.events.is_empty() {
            None
        } else {
            Some(mem::take(&mut state.events))
        }
    }

    /// Marks the queue closed and wakes a blocked drainer. Buffered
    /// events remain drainable; subsequent pushes are discarded.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{LogEvent, Severity};
    use std::time::Duration;
    use tokio::time::timeout;

    fn event(text: &str) -> LogEvent {
        LogEvent::new(Severity::Error, "test", text)
    }

    fn queue(capacity: usize) -> Arc<EventQueue> {
        Arc::new(EventQueue::new(capacity, Arc::new(SinkMetrics::new())))
    }

    #[tokio::test]
    async fn test_push_beyond_capacity_drops_events() {
        let queue = queue(4);
        for i in 0..6 {
            queue.push(event(&format!("event {}", i)));
        }
        assert_eq!(queue.len(), 4);

        let snap = queue.metrics.snapshot();
        assert_eq!(snap.events_enqueued, 4);
        assert_eq!(snap.events_dropped, 2);

        let batch = queue.drain().await.unwrap();
        let texts: Vec<&str> = batch.iter().filter_map(|e| e.message.as_deref()).collect();
        assert_eq!(texts, vec!["event 0", "event 1", "event 2", "event 3"]);
    }

    #[tokio::test]
    async fn test_drain_takes_everything_and_resets() {
        let queue = queue(8);
        queue.push(event("a"));
        queue.push(event("b"));

        let batch = queue.drain().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(queue.is_empty());
        assert!(queue.try_drain().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_blocks_while_empty() {
        let queue = queue(8);
        let blocked = timeout(Duration::from_millis(50), queue.drain()).await;
        assert!(blocked.is_err());

        queue.push(event("late arrival"));
        let batch = timeout(Duration::from_secs(1), queue.drain())
            .await
            .expect("drain should wake after push")
            .unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_wakes_parked_drainer() {
        let queue = queue(8);
        let drainer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.drain().await })
        };
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        queue.push(event("wake up"));
        let batch = timeout(Duration::from_secs(1), drainer)
            .await
            .expect("drainer should finish")
            .unwrap()
            .unwrap();
        assert_eq!(batch[0].message.as_deref(), Some("wake up"));
    }

    #[tokio::test]
    async fn test_close_releases_leftovers_then_ends() {
        let queue = queue(8);
        queue.push(event("tail"));
        queue.close();

        let batch = queue.drain().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert!(queue.drain().await.is_none());

        assert!(!queue.push(event("after close")));
        assert_eq!(queue.metrics.snapshot().events_dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_wakes_parked_drainer() {
        let queue = queue(8);
        let drainer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.drain().await })
        };
        tokio::task::yield_now().await;

        queue.close();
        let drained = timeout(Duration::from_secs(1), drainer)
            .await
            .expect("drainer should finish")
            .unwrap();
        assert!(drained.is_none());
    }

    #[tokio::test]
    async fn test_capacity_minimum_is_one() {
        let queue = queue(0);
        assert_eq!(queue.capacity(), 1);
        assert!(queue.push(event("only")));
        assert!(!queue.push(event("overflow")));
    }
}
