//! Connection identity and lifecycle state.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Atomic counter for ensuring unique IDs even within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64;
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{timestamp:x}_{counter:x}"))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of a connection.
///
/// The only legal transitions are `Connecting -> Authenticated`,
/// `Connecting -> Closed`, and `Authenticated -> Closed`. `Closed` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Transport is up, credential not yet verified.
    Connecting = 0,
    /// Credential verified, identity bound.
    Authenticated = 1,
    /// Torn down. No transition leaves this state.
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Authenticated,
            _ => ConnectionState::Closed,
        }
    }
}

/// Atomic cell holding a [`ConnectionState`].
///
/// `advance` enforces the state machine: an attempted transition that is
/// not an edge of the machine (including anything out of `Closed`) returns
/// `false` and leaves the state untouched. A successful
/// `advance(Closed)` therefore happens at most once per connection, which
/// is what makes teardown exactly-once.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    /// Create a cell in the `Connecting` state.
    #[must_use]
    pub fn new() -> Self {
        Self(AtomicU8::new(ConnectionState::Connecting as u8))
    }

    /// Read the current state.
    #[must_use]
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Attempt a transition. Returns `true` if the transition was applied.
    pub fn advance(&self, to: ConnectionState) -> bool {
        use ConnectionState::{Authenticated, Closed, Connecting};
        loop {
            let current = self.get();
            let allowed = matches!(
                (current, to),
                (Connecting, Authenticated) | (Connecting, Closed) | (Authenticated, Closed)
            );
            if !allowed {
                return false;
            }
            if self
                .0
                .compare_exchange(current as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
