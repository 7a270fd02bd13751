//! Domain event system: decoupled communication between components.
//!
//! Events are published when something interesting happens in the core.
//! Other components (and embedding hosts) can subscribe to react without
//! tight coupling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A decision was resolved (by rule, pattern or safe default)
    DecisionMade {
        category: String,
        action: String,
        method: String,
        confidence: f64,
        timestamp: DateTime<Utc>,
    },

    /// A task entered the queue
    TaskQueued {
        task_id: String,
        task_type: String,
        timestamp: DateTime<Utc>,
    },

    /// A task finished successfully
    TaskCompleted {
        task_id: String,
        task_type: String,
        route: String,
        timestamp: DateTime<Utc>,
    },

    /// A task failed; the message is recorded on the task too
    TaskFailed {
        task_id: String,
        task_type: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// Conversation history was compressed
    ConversationCompressed {
        before: usize,
        after: usize,
        timestamp: DateTime<Utc>,
    },

    /// Expired cache entries were swept
    CacheSwept {
        removed: usize,
        timestamp: DateTime<Utc>,
    },

    /// Pending batched operations were dispatched
    BatchFlushed {
        op_type: String,
        items: usize,
        timestamp: DateTime<Utc>,
    },

    /// The periodic health check ran
    HealthChecked {
        healthy: bool,
        queue_depth: usize,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Components can subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::TaskCompleted {
            task_id: "t1".into(),
            task_type: "word_count".into(),
            route: "local".into(),
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::TaskCompleted { task_id, route, .. } => {
                assert_eq!(task_id, "t1");
                assert_eq!(route, "local");
            }
            _ => panic!("Expected TaskCompleted event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::CacheSwept {
            removed: 0,
            timestamp: Utc::now(),
        });
    }
}
