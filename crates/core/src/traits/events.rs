use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::events::{EventEnvelope, EventType};

/// Trait for emitting structured events.
#[async_trait]
pub trait EventEmitter: Send + Sync {
    /// Emit an event.
    async fn emit(&self, event: EventEnvelope);
}

/// No-op implementation for testing/default.
pub struct NoOpEventEmitter;

#[async_trait]
impl EventEmitter for NoOpEventEmitter {
    async fn emit(&self, _event: EventEnvelope) {}
}

/// Keeps every emitted event in memory.
#[derive(Default)]
pub struct MemoryEventEmitter {
    events: Mutex<Vec<EventEnvelope>>,
}

impl MemoryEventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<EventEnvelope> {
        self.events.lock().await.clone()
    }

    pub async fn count_of(&self, event_type: &EventType) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| &e.event_type == event_type)
            .count()
    }
}

#[async_trait]
impl EventEmitter for MemoryEventEmitter {
    async fn emit(&self, event: EventEnvelope) {
        self.events.lock().await.push(event);
    }
}
