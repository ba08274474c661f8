//! The relay engine.
//!
//! Composes the presence registry, room router, message store, and
//! identity verifier into the connection lifecycle: authenticate, join,
//! send, fan out, tear down. Commands arrive through a [`Session`] handle;
//! server-to-client pushes leave through the session's event mailbox.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::auth::IdentityVerifier;
use crate::connection::{ConnectionId, ConnectionState, StateCell};
use crate::error::RelayError;
use crate::message::Message;
use crate::presence::{Identity, PresenceChange, PresenceRegistry};
use crate::router::{RoomRouter, RouterConfig};
use crate::store::MessageStore;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a connection may sit unverified before it is closed.
    pub auth_timeout: Duration,
    /// Maximum message body size in bytes.
    pub max_message_size: usize,
    /// Router limits.
    pub router: RouterConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(10),
            max_message_size: 64 * 1024,
            router: RouterConfig::default(),
        }
    }
}

/// A server-to-client push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A message delivered to a subscribed room.
    Message(Message),
    /// Updated snapshot of all online identities.
    Presence(Vec<Identity>),
}

/// Engine-side record of a live connection: its verified identity and the
/// sender half of its event mailbox.
struct ConnectionHandle {
    identity: Identity,
    outbox: mpsc::UnboundedSender<RelayEvent>,
}

/// Engine statistics.
#[derive(Debug, Clone)]
pub struct EngineStats {
    /// Live authenticated connections.
    pub connections: usize,
    /// Online identities.
    pub online: usize,
    /// Live rooms.
    pub rooms: usize,
    /// Total room subscriptions.
    pub subscriptions: usize,
}

/// The relay engine.
///
/// Shared across all connection tasks. Registry and router mutations are
/// synchronous in-memory critical sections; the only suspension points are
/// credential verification and store calls.
pub struct RelayEngine {
    verifier: Arc<dyn IdentityVerifier>,
    store: Arc<dyn MessageStore>,
    presence: PresenceRegistry,
    router: RoomRouter,
    connections: DashMap<ConnectionId, ConnectionHandle>,
    config: EngineConfig,
}

impl RelayEngine {
    /// Create an engine with default configuration.
    #[must_use]
    pub fn new(verifier: Arc<dyn IdentityVerifier>, store: Arc<dyn MessageStore>) -> Arc<Self> {
        Self::with_config(verifier, store, EngineConfig::default())
    }

    /// Create an engine with custom configuration.
    #[must_use]
    pub fn with_config(
        verifier: Arc<dyn IdentityVerifier>,
        store: Arc<dyn MessageStore>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            verifier,
            store,
            presence: PresenceRegistry::new(),
            router: RoomRouter::with_config(config.router.clone()),
            connections: DashMap::new(),
            config,
        })
    }

    /// Authenticate a new connection and return its session handle.
    ///
    /// Verification runs under the configured timeout. A failed connection
    /// never touches the presence registry or the router.
    ///
    /// # Errors
    ///
    /// - [`RelayError::AuthTimeout`] if verification does not complete in
    ///   time.
    /// - [`RelayError::Auth`] if the verifier rejects the credential.
    /// - [`RelayError::IdentityMismatch`] if `claimed_identity` differs
    ///   from the identity the credential verifies to.
    pub async fn connect(
        self: &Arc<Self>,
        credential: &str,
        claimed_identity: Option<&str>,
    ) -> Result<Session, RelayError> {
        let verified = match timeout(self.config.auth_timeout, self.verifier.verify(credential)).await
        {
            Err(_) => {
                warn!("Credential verification timed out");
                return Err(RelayError::AuthTimeout);
            }
            Ok(Err(err)) => {
                debug!(error = %err, "Credential rejected");
                return Err(RelayError::Auth(err.to_string()));
            }
            Ok(Ok(identity)) => identity,
        };

        if let Some(claimed) = claimed_identity {
            if claimed != verified {
                warn!(claimed = %claimed, verified = %verified, "Claimed identity mismatch");
                return Err(RelayError::IdentityMismatch {
                    claimed: claimed.to_string(),
                    verified,
                });
            }
        }

        let id = ConnectionId::generate();
        let state = Arc::new(StateCell::new());
        state.advance(ConnectionState::Authenticated);

        let (outbox, events) = mpsc::unbounded_channel();
        self.connections.insert(
            id.clone(),
            ConnectionHandle {
                identity: verified.clone(),
                outbox: outbox.clone(),
            },
        );

        // Initial presence sync for the new connection; a global broadcast
        // covers it instead when the identity just came online.
        match self.presence.register(&verified, &id) {
            PresenceChange::Online(_) => self.broadcast_presence(),
            _ => {
                let _ = outbox.send(RelayEvent::Presence(self.presence.snapshot()));
            }
        }

        debug!(connection = %id, identity = %verified, "Connection authenticated");

        Ok(Session {
            engine: Arc::clone(self),
            id,
            identity: verified,
            state,
            events: Some(events),
        })
    }

    /// All currently-online identities, sorted.
    #[must_use]
    pub fn online(&self) -> Vec<Identity> {
        self.presence.snapshot()
    }

    /// Engine statistics.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let router = self.router.stats();
        EngineStats {
            connections: self.connections.len(),
            online: self.presence.online_count(),
            rooms: router.room_count,
            subscriptions: router.total_subscriptions,
        }
    }

    /// Push the current presence snapshot to every authenticated connection.
    fn broadcast_presence(&self) {
        let snapshot = self.presence.snapshot();
        for handle in self.connections.iter() {
            // A dropped mailbox means the connection is tearing down.
            let _ = handle.outbox.send(RelayEvent::Presence(snapshot.clone()));
        }
    }

    /// Exactly-once teardown, guarded by the session's `Closed` transition.
    /// All steps are synchronous in-memory mutations, so this is callable
    /// from `Drop`.
    fn teardown(&self, id: &ConnectionId, identity: &Identity) {
        self.connections.remove(id);
        self.router.unsubscribe_all(id);
        if matches!(
            self.presence.unregister(identity, id),
            PresenceChange::Offline(_)
        ) {
            self.broadcast_presence();
        }
        debug!(connection = %id, identity = %identity, "Connection closed");
    }
}

/// Handle to one authenticated connection.
///
/// Commands (`join`, `leave`, `send`, `close`) go in through the handle;
/// pushes come out of [`next_event`]. The handle is single-owner, so one
/// connection's operations are processed in the order they were issued.
/// Dropping the session closes it.
///
/// [`next_event`]: Session::next_event
pub struct Session {
    engine: Arc<RelayEngine>,
    id: ConnectionId,
    identity: Identity,
    state: Arc<StateCell>,
    events: Option<mpsc::UnboundedReceiver<RelayEvent>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// The connection's unique id.
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        &self.id
    }

    /// The verified identity bound to this connection. Never changes.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Whether the session is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.get() == ConnectionState::Authenticated
    }

    fn ensure_open(&self) -> Result<(), RelayError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(RelayError::ConnectionClosed)
        }
    }

    /// Join a room and return its history in store order.
    ///
    /// Rejoining an already-joined room is a no-op that still returns the
    /// history.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed, the room name is
    /// invalid, a limit is exceeded, or the history read fails. A failed
    /// history read leaves the subscription in place; the error is
    /// recoverable.
    pub async fn join(&self, room: &str) -> Result<Vec<Message>, RelayError> {
        self.ensure_open()?;
        self.engine.router.subscribe(room, &self.id)?;
        let history = self.engine.store.list(room).await?;
        Ok(history)
    }

    /// Leave a room. Leaving a room that was never joined is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ConnectionClosed`] if the session is closed.
    pub fn leave(&self, room: &str) -> Result<(), RelayError> {
        self.ensure_open()?;
        self.engine.router.unsubscribe(room, &self.id);
        Ok(())
    }

    /// Send a message to a joined room.
    ///
    /// The message is persisted before any fan-out: no subscriber can
    /// observe a message that failed to persist. Delivery to subscribers
    /// (the sender included) happens under the room's publish lock, so
    /// every subscriber mailbox observes messages in store-append order.
    /// A dead subscriber never aborts delivery to the rest.
    ///
    /// # Errors
    ///
    /// - [`RelayError::NotSubscribed`] if this connection has not joined
    ///   `room`; checked before any store call.
    /// - [`RelayError::MessageTooLarge`] if `body` exceeds the limit.
    /// - [`RelayError::StoreUnavailable`] if persistence fails; nothing
    ///   was delivered and the session stays open.
    pub async fn send(&self, room: &str, body: &str) -> Result<Message, RelayError> {
        self.ensure_open()?;

        let limit = self.engine.config.max_message_size;
        if body.len() > limit {
            return Err(RelayError::MessageTooLarge {
                size: body.len(),
                limit,
            });
        }

        if !self.engine.router.is_subscribed(room, &self.id) {
            return Err(RelayError::NotSubscribed(room.to_string()));
        }

        // The room entry exists while we hold a membership; if it vanished,
        // a concurrent teardown already removed us.
        let lock = self
            .engine
            .router
            .publish_lock(room)
            .ok_or_else(|| RelayError::NotSubscribed(room.to_string()))?;
        let _guard = lock.lock().await;

        let message = self.engine.store.append(room, &self.identity, body).await?;

        for subscriber in self.engine.router.subscribers_of(room) {
            if let Some(handle) = self.engine.connections.get(&subscriber) {
                let _ = handle.outbox.send(RelayEvent::Message(message.clone()));
            }
        }

        debug!(
            room = %room,
            connection = %self.id,
            seq = message.seq,
            "Message delivered"
        );

        Ok(message)
    }

    /// Receive the next server push. `None` after the session closed and
    /// the mailbox drained, or after the mailbox was detached.
    pub async fn next_event(&mut self) -> Option<RelayEvent> {
        match self.events.as_mut() {
            Some(events) => events.recv().await,
            None => None,
        }
    }

    /// Non-blocking variant of [`next_event`].
    ///
    /// [`next_event`]: Session::next_event
    pub fn try_event(&mut self) -> Option<RelayEvent> {
        self.events.as_mut().and_then(|events| events.try_recv().ok())
    }

    /// Detach the event mailbox from the command handle, so pushes can be
    /// consumed from a `select!` loop while commands are issued on the
    /// session. After this, [`next_event`] on the session returns `None`.
    ///
    /// [`next_event`]: Session::next_event
    #[must_use]
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<RelayEvent>> {
        self.events.take()
    }

    /// Close the session. Idempotent; teardown runs exactly once even if
    /// close races the drop.
    pub fn close(&mut self) {
        if self.state.advance(ConnectionState::Closed) {
            self.engine.teardown(&self.id, &self.identity);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
