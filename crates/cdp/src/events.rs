//! Connection lifecycle events
//!
//! Broadcast so an outer connection manager can watch for drops and decide
//! whether to reconnect. The client itself never reconnects.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::protocol::{SessionId, TargetId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionEvent {
    Connected { url: String },
    Disconnected { reason: String },
    SessionAttached { session_id: SessionId, target_id: TargetId },
    SessionDetached { session_id: SessionId },
}

/// Simple event bus using tokio broadcast channel
pub struct EventBus {
    tx: broadcast::Sender<ConnectionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    /// Publish an event
    pub fn publish(&self, event: ConnectionEvent) {
        tracing::debug!("Connection event: {:?}", event);
        let _ = self.tx.send(event); // Ignore error if no subscribers
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(ConnectionEvent::Disconnected {
            reason: "gone".into(),
        });

        match rx.recv().await {
            Ok(ConnectionEvent::Disconnected { reason }) => assert_eq!(reason, "gone"),
            other => panic!("Expected Disconnected event, got {:?}", other),
        }
    }

    #[test]
    fn test_event_serialization() {
        let event = ConnectionEvent::SessionDetached {
            session_id: "S1".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session_detached");
        assert_eq!(json["session_id"], "S1");
    }
}
