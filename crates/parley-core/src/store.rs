//! Durable message storage.
//!
//! The relay treats storage as an opaque collaborator: append a message,
//! list a room's log. Appends are at-most-once per logical send; the
//! engine never retries, a failure is surfaced to the sender who may
//! resend as a new distinct message.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::trace;

use crate::error::RelayError;
use crate::message::Message;
use crate::router::RoomId;

/// Storage failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not complete the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for RelayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(reason) => RelayError::StoreUnavailable(reason),
        }
    }
}

/// Append-only log of messages keyed by room.
///
/// `append` assigns the per-room sequence number; that assignment order is
/// the canonical order of messages within a room.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message and return it with its assigned sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if persistence fails. The
    /// message was not stored in that case.
    async fn append(&self, room: &str, sender: &str, body: &str) -> Result<Message, StoreError>;

    /// The room's messages in append order. Used for history hydration on
    /// join, not by the live delivery path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the log cannot be read.
    async fn list(&self, room: &str) -> Result<Vec<Message>, StoreError>;
}

/// In-memory reference store.
///
/// Per-room logs behind DashMap shard locks; sequence numbers are assigned
/// under the room's entry lock, so they are dense and gap-free per room.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rooms: DashMap<RoomId, Vec<Message>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages stored for a room.
    #[must_use]
    pub fn len(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, |log| log.len())
    }

    /// Whether the room's log is empty.
    #[must_use]
    pub fn is_empty(&self, room: &str) -> bool {
        self.len(room) == 0
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, room: &str, sender: &str, body: &str) -> Result<Message, StoreError> {
        let mut log = self.rooms.entry(room.to_string()).or_default();
        let seq = log.len() as u64 + 1;
        let message = Message::new(room, sender, body, seq);
        log.push(message.clone());
        trace!(room = %room, seq = seq, "Appended message");
        Ok(message)
    }

    async fn list(&self, room: &str) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .rooms
            .get(room)
            .map(|log| log.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_assigns_dense_sequence() {
        let store = MemoryStore::new();

        let m1 = store.append("lobby", "alice", "one").await.unwrap();
        let m2 = store.append("lobby", "bob", "two").await.unwrap();
        let m3 = store.append("lobby", "alice", "three").await.unwrap();

        assert_eq!((m1.seq, m2.seq, m3.seq), (1, 2, 3));
    }

    #[tokio::test]
    async fn test_sequences_are_per_room() {
        let store = MemoryStore::new();

        store.append("r1", "alice", "a").await.unwrap();
        let m = store.append("r2", "alice", "b").await.unwrap();
        assert_eq!(m.seq, 1);
    }

    #[tokio::test]
    async fn test_list_preserves_append_order() {
        let store = MemoryStore::new();

        for i in 0..5 {
            store
                .append("lobby", "alice", &format!("msg-{i}"))
                .await
                .unwrap();
        }

        let log = store.list("lobby").await.unwrap();
        assert_eq!(log.len(), 5);
        for (i, msg) in log.iter().enumerate() {
            assert_eq!(msg.seq, i as u64 + 1);
            assert_eq!(msg.body, format!("msg-{i}"));
        }
    }

    #[tokio::test]
    async fn test_list_unknown_room_is_empty() {
        let store = MemoryStore::new();
        assert!(store.list("nowhere").await.unwrap().is_empty());
    }
}
