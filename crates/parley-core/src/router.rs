//! Room-scoped subscription routing.
//!
//! The router maps each room to its live subscriber set, plus a reverse
//! index from connection to joined rooms so disconnect teardown is a
//! single lookup. Rooms with no subscribers consume no router memory.

use dashmap::{DashMap, DashSet};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::connection::ConnectionId;
use crate::error::RelayError;

/// A room identifier.
pub type RoomId = String;

/// Maximum room name length.
pub const MAX_ROOM_NAME_LENGTH: usize = 128;

/// Validate a room name.
///
/// # Errors
///
/// Returns an error message if the room name is invalid.
pub fn validate_room_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Room name cannot be empty");
    }
    if name.len() > MAX_ROOM_NAME_LENGTH {
        return Err("Room name too long");
    }
    if name.starts_with('$') {
        return Err("Room names starting with '$' are reserved");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Room name contains invalid characters");
    }
    Ok(())
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum number of live rooms.
    pub max_rooms: usize,
    /// Maximum subscriptions per connection.
    pub max_subscriptions_per_connection: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_rooms: 10_000,
            max_subscriptions_per_connection: 100,
        }
    }
}

/// A live room: its subscribers and the lock serializing publishes to it.
struct RoomEntry {
    subscribers: HashSet<ConnectionId>,
    publish_lock: Arc<Mutex<()>>,
}

impl RoomEntry {
    fn new() -> Self {
        Self {
            subscribers: HashSet::new(),
            publish_lock: Arc::new(Mutex::new(())),
        }
    }
}

/// The room router.
///
/// Mutations are atomic per entry (DashMap shard locks); the reverse index
/// is always updated together with the room entry, so `unsubscribe_all`
/// racing a `subscribe` resolves to one winner per room rather than a
/// partially-applied state.
pub struct RoomRouter {
    /// Rooms indexed by name. Entries exist only while subscribed.
    rooms: DashMap<RoomId, RoomEntry>,
    /// Reverse index: connection -> rooms it has joined.
    memberships: DashMap<ConnectionId, DashSet<RoomId>>,
    config: RouterConfig,
}

impl RoomRouter {
    /// Create a router with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create a router with custom configuration.
    #[must_use]
    pub fn with_config(config: RouterConfig) -> Self {
        info!("Creating room router with config: {:?}", config);
        Self {
            rooms: DashMap::new(),
            memberships: DashMap::new(),
            config,
        }
    }

    /// Subscribe a connection to a room.
    ///
    /// Re-subscribing to an already-joined room is a no-op and returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns an error if the room name is invalid or a limit is exceeded.
    pub fn subscribe(&self, room: &str, connection_id: &ConnectionId) -> Result<(), RelayError> {
        validate_room_name(room).map_err(RelayError::InvalidRoom)?;

        let conn_rooms = self
            .memberships
            .entry(connection_id.clone())
            .or_default();

        if conn_rooms.contains(room) {
            return Ok(());
        }

        if conn_rooms.len() >= self.config.max_subscriptions_per_connection {
            return Err(RelayError::SubscriptionLimit);
        }

        if !self.rooms.contains_key(room) && self.rooms.len() >= self.config.max_rooms {
            return Err(RelayError::RoomLimit);
        }

        let mut entry = self
            .rooms
            .entry(room.to_string())
            .or_insert_with(RoomEntry::new);
        entry.subscribers.insert(connection_id.clone());
        conn_rooms.insert(room.to_string());

        debug!(
            room = %room,
            connection = %connection_id,
            subscribers = entry.subscribers.len(),
            "Subscribed"
        );

        Ok(())
    }

    /// Unsubscribe a connection from a room.
    ///
    /// Leaving a room that was never joined is a no-op. The room entry is
    /// dropped when its subscriber set empties.
    pub fn unsubscribe(&self, room: &str, connection_id: &ConnectionId) {
        let was_member = self
            .memberships
            .get(connection_id)
            .is_some_and(|conn_rooms| conn_rooms.remove(room).is_some());
        if !was_member {
            return;
        }

        self.remove_subscriber(room, connection_id);
        debug!(room = %room, connection = %connection_id, "Unsubscribed");
    }

    /// Unsubscribe a connection from every room it has joined.
    ///
    /// Invoked on disconnect. Safe to call when no memberships exist,
    /// including after a partial join failure.
    pub fn unsubscribe_all(&self, connection_id: &ConnectionId) {
        let Some((_, rooms)) = self.memberships.remove(connection_id) else {
            return;
        };

        for room in rooms.iter() {
            self.remove_subscriber(room.as_str(), connection_id);
        }

        debug!(connection = %connection_id, "Unsubscribed from all rooms");
    }

    fn remove_subscriber(&self, room: &str, connection_id: &ConnectionId) {
        if let Some(mut entry) = self.rooms.get_mut(room) {
            entry.subscribers.remove(connection_id);
            if entry.subscribers.is_empty() {
                drop(entry); // Release the shard lock before removal
                self.rooms.remove(room);
                debug!(room = %room, "Dropped empty room");
            }
        }
    }

    /// Current subscribers of a room. Fan-out input only; never exposed
    /// raw to clients.
    #[must_use]
    pub fn subscribers_of(&self, room: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|entry| entry.subscribers.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether a connection is subscribed to a room.
    #[must_use]
    pub fn is_subscribed(&self, room: &str, connection_id: &ConnectionId) -> bool {
        self.memberships
            .get(connection_id)
            .is_some_and(|conn_rooms| conn_rooms.contains(room))
    }

    /// The lock serializing append + fan-out for a room.
    ///
    /// `None` means the room has no live entry (no subscribers).
    #[must_use]
    pub fn publish_lock(&self, room: &str) -> Option<Arc<Mutex<()>>> {
        self.rooms.get(room).map(|entry| Arc::clone(&entry.publish_lock))
    }

    /// Number of live rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            room_count: self.rooms.len(),
            connection_count: self.memberships.len(),
            total_subscriptions: self.memberships.iter().map(|s| s.len()).sum(),
        }
    }
}

impl Default for RoomRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Router statistics.
#[derive(Debug, Clone)]
pub struct RouterStats {
    /// Number of live rooms.
    pub room_count: usize,
    /// Number of connections with at least one subscription.
    pub connection_count: usize,
    /// Total number of subscriptions.
    pub total_subscriptions: usize,
}
