//! Event emission system.
//!
//! Events are pushed from the daemon to live subscribers (websocket
//! clients, tests). Each subscriber rides a bounded broadcast ring; a
//! slow subscriber lags and is told how many events it missed rather
//! than ever blocking a write.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::now_secs;

/// All event types published by the hub.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    NewNode,
    NodeUpdate,
    NewSpectrogram,
    NewAlert,
    SpectrogramAnalyzed,
    SyncCompleted,
    SessionAbandoned,
    SubscriberLag,
}

/// An event emitted by the hub.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HubEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: u64,
    pub payload: serde_json::Value,
}

impl HubEvent {
    pub fn new(event_type: EventType, payload: serde_json::Value) -> Self {
        Self {
            event_type,
            timestamp: now_secs(),
            payload,
        }
    }
}

/// Event bus for broadcasting events to subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<HubEvent>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with the given per-subscriber capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event_type: EventType, payload: serde_json::Value) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(HubEvent::new(event_type, payload));
    }

    /// Subscribe to events. Returns a receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.sender.subscribe()
    }

    /// Events emitted since startup.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(
            EventType::NewAlert,
            serde_json::json!({"node_id": "GUARDIAN_001"}),
        );

        let event = rx.try_recv().expect("receive event");
        assert_eq!(event.event_type, EventType::NewAlert);
        assert_eq!(event.payload["node_id"], "GUARDIAN_001");
        assert_eq!(bus.sequence(), 1);
    }

    #[test]
    fn test_event_type_wire_names() {
        let json = serde_json::to_string(&EventType::NewSpectrogram).expect("serialize");
        assert_eq!(json, "\"new_spectrogram\"");
        let json = serde_json::to_string(&EventType::SubscriberLag).expect("serialize");
        assert_eq!(json, "\"subscriber_lag\"");
    }

    #[test]
    fn test_slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();

        for i in 0..10 {
            bus.emit(EventType::NodeUpdate, serde_json::json!({"i": i}));
        }

        // The ring kept the newest four; the receiver is told it lagged.
        match rx.try_recv() {
            Err(broadcast::error::TryRecvError::Lagged(n)) => assert_eq!(n, 6),
            other => panic!("expected lag, got {other:?}"),
        }
        let next = rx.try_recv().expect("receive after lag");
        assert_eq!(next.payload["i"], 6);
    }

    #[test]
    fn test_writes_never_block_without_subscribers() {
        let bus = EventBus::new(2);
        for i in 0..100 {
            bus.emit(EventType::NewNode, serde_json::json!({"i": i}));
        }
        assert_eq!(bus.sequence(), 100);
    }
}
