//! Typed event channel shared by the registry, router and worker runtimes.

use agentrun_core::{Event, EventKind, LogLevel};
use tokio::sync::broadcast;
use tracing::trace;

/// Broadcast channel of [`Event`]s. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus retaining up to `capacity` unread events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, kind: EventKind) {
        let event = Event::now(kind);
        trace!(event = event.name(), "Publishing event");
        let _ = self.tx.send(event);
    }

    /// Publish a `Log` event.
    pub fn log(&self, level: LogLevel, source: &str, message: impl Into<String>) {
        let _ = self.tx.send(Event::log(level, source, message));
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
