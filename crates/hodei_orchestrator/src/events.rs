//! In-process event bus.
//!
//! Fan-out of typed control-plane events to any number of subscribers
//! (webhook adapters, the CLI's event tail, tests). Publishing never blocks:
//! the bus is a bounded broadcast ring and slow subscribers observe
//! `Lagged` rather than stalling publishers. Per-resource ordering follows
//! from every event for a resource being published by its single owning
//! component.

use crate::models::Event;
use tokio::sync::broadcast;
use tracing::debug;

const BUS_CAPACITY: usize = 1024;

pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Dropped silently when nobody listens.
    pub fn publish(&self, event: Event) {
        debug!(kind = event.kind.as_str(), "event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
