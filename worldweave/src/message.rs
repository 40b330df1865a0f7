//! Simulation message: immutable once sent.
//!
//! A missing `receiver_id` means broadcast; the router decides the concrete
//! recipient set at delivery time. `step` is monotonic non-decreasing within
//! one simulation (the message log is append-only).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One message in the simulation log.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    /// None means broadcast to every recipient the topology allows.
    pub receiver_id: Option<String>,
    pub content: String,
    pub step: u64,
    pub timestamp: DateTime<Utc>,
    pub simulation_id: String,
}

impl Message {
    /// Creates a message stamped now.
    pub fn new(
        simulation_id: impl Into<String>,
        sender_id: impl Into<String>,
        receiver_id: Option<String>,
        content: impl Into<String>,
        step: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender_id: sender_id.into(),
            receiver_id,
            content: content.into(),
            step,
            timestamp: Utc::now(),
            simulation_id: simulation_id.into(),
        }
    }

    /// Whether this message is addressed to everyone.
    pub fn is_broadcast(&self) -> bool {
        self.receiver_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: a message without a receiver is a broadcast.
    #[test]
    fn message_without_receiver_is_broadcast() {
        let message = Message::new("sim-1", "alice", None, "hello", 0);
        assert!(message.is_broadcast());

        let message = Message::new("sim-1", "alice", Some("bob".into()), "hello", 0);
        assert!(!message.is_broadcast());
    }

    /// **Scenario**: messages round-trip through JSON with the step intact.
    #[test]
    fn message_roundtrips() {
        let message = Message::new("sim-1", "alice", Some("bob".into()), "hi", 4);
        let json = serde_json::to_string(&message).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);
        assert_eq!(back.step, 4);
    }
}
