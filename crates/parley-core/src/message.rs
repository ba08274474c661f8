//! Chat message type.

use parley_protocol::WireMessage;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::presence::Identity;
use crate::router::RoomId;

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// A chat message, immutable once created.
///
/// Messages are produced only by a [`crate::store::MessageStore`] append;
/// `seq` is the store-assigned per-room sequence and is the canonical order
/// of messages within a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Room the message belongs to.
    pub room: RoomId,
    /// Verified identity of the sender.
    pub sender: Identity,
    /// Message text.
    pub body: String,
    /// Per-room sequence number, starting at 1.
    pub seq: u64,
    /// Server timestamp in milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl Message {
    /// Create a message stamped with the current time.
    #[must_use]
    pub fn new(
        room: impl Into<RoomId>,
        sender: impl Into<Identity>,
        body: impl Into<String>,
        seq: u64,
    ) -> Self {
        Self {
            room: room.into(),
            sender: sender.into(),
            body: body.into(),
            seq,
            timestamp: now_millis(),
        }
    }

    /// Get the body size in bytes.
    #[must_use]
    pub fn body_size(&self) -> usize {
        self.body.len()
    }
}

impl From<Message> for WireMessage {
    fn from(msg: Message) -> Self {
        WireMessage {
            room: msg.room,
            sender: msg.sender,
            body: msg.body,
            seq: msg.seq,
            timestamp: msg.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::new("lobby", "alice", "hello", 1);
        assert_eq!(msg.room, "lobby");
        assert_eq!(msg.sender, "alice");
        assert_eq!(msg.seq, 1);
        assert!(msg.timestamp > 0);
    }

    #[test]
    fn test_message_to_wire() {
        let msg = Message::new("lobby", "alice", "hello", 3);
        let wire: WireMessage = msg.clone().into();
        assert_eq!(wire.room, msg.room);
        assert_eq!(wire.seq, 3);
        assert_eq!(wire.timestamp, msg.timestamp);
    }
}
