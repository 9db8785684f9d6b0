//! Event bus for broadcasting domain events to live connections

use super::types::{DomainEvent, EventEmitter};
use tokio::sync::broadcast;
use tracing::debug;

/// Default broadcast channel capacity
const DEFAULT_CAPACITY: usize = 1024;

/// Distributes DomainEvents via `tokio::sync::broadcast`.
///
/// Fire-and-forget: emitting never blocks, never panics. If no subscribers
/// are connected, events are silently dropped — offline clients reconcile
/// through the polling fallback, not a replay buffer.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to receive events (one receiver per live connection)
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventEmitter for EventBus {
    fn emit(&self, event: DomainEvent) {
        match self.sender.send(event) {
            Ok(n) => {
                debug!(subscribers = n, "domain event emitted");
            }
            Err(_) => {
                // No subscribers — expected and fine
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
