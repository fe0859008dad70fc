//! Event emission system.
//!
//! Events are pushed from the daemon to POS subscribers via the JSON-RPC
//! event channel. Each subscriber has an independent buffer with
//! backpressure at the bus capacity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use cortado_types::event::LoyaltyEventKind;

/// An event emitted by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// What happened.
    pub kind: LoyaltyEventKind,
    /// Unix timestamp.
    pub timestamp: u64,
    /// Kind-specific payload.
    pub payload: serde_json::Value,
}

/// Event bus for broadcasting events to subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: Event) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events. Returns a receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Get the current sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_bus_emit_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(Event {
            kind: LoyaltyEventKind::DaemonStarted,
            timestamp: 1000,
            payload: serde_json::json!({"version": "0.1.0"}),
        });

        let event = rx.try_recv().expect("receive event");
        assert!(matches!(event.kind, LoyaltyEventKind::DaemonStarted));
        assert_eq!(bus.sequence(), 1);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(16);
        bus.emit(Event {
            kind: LoyaltyEventKind::PurchaseRecorded,
            timestamp: 1000,
            payload: serde_json::json!({}),
        });
        assert_eq!(bus.sequence(), 1);
    }
}
