//! Error taxonomy for the relay.

use thiserror::Error;

use crate::router::RoomId;

/// Errors surfaced by the relay engine and its components.
///
/// Fatal errors terminate the connection; recoverable ones are reported to
/// the originating connection and the session continues.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Bad or missing credential.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Credential verification did not complete in time.
    #[error("Authentication timed out")]
    AuthTimeout,

    /// Client-declared identity does not match the verified identity.
    #[error("Claimed identity '{claimed}' does not match verified identity '{verified}'")]
    IdentityMismatch {
        /// Identity the client claimed.
        claimed: String,
        /// Identity the credential actually verified to.
        verified: String,
    },

    /// Send to a room the connection has not joined.
    #[error("Not subscribed to room: {0}")]
    NotSubscribed(RoomId),

    /// Message persistence failed.
    #[error("Message store unavailable: {0}")]
    StoreUnavailable(String),

    /// Underlying connection dropped mid-operation.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation on a connection that has already closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Invalid room name.
    #[error("Invalid room name: {0}")]
    InvalidRoom(&'static str),

    /// Message body exceeds the configured limit.
    #[error("Message body of {size} bytes exceeds limit of {limit}")]
    MessageTooLarge {
        /// Actual body size in bytes.
        size: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// Per-connection subscription limit reached.
    #[error("Maximum subscriptions per connection reached")]
    SubscriptionLimit,

    /// Total room limit reached.
    #[error("Maximum number of rooms reached")]
    RoomLimit,
}

impl RelayError {
    /// Stable machine-readable kind, used on the wire.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Auth(_) => "auth",
            RelayError::AuthTimeout => "auth_timeout",
            RelayError::IdentityMismatch { .. } => "identity_mismatch",
            RelayError::NotSubscribed(_) => "not_subscribed",
            RelayError::StoreUnavailable(_) => "store_unavailable",
            RelayError::Transport(_) => "transport",
            RelayError::ConnectionClosed => "connection_closed",
            RelayError::InvalidRoom(_) => "invalid_room",
            RelayError::MessageTooLarge { .. } => "message_too_large",
            RelayError::SubscriptionLimit => "subscription_limit",
            RelayError::RoomLimit => "room_limit",
        }
    }

    /// Numeric wire code for this error.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            RelayError::Auth(_) => 4001,
            RelayError::AuthTimeout => 4002,
            RelayError::IdentityMismatch { .. } => 4003,
            RelayError::NotSubscribed(_) => 4004,
            RelayError::StoreUnavailable(_) => 4005,
            RelayError::Transport(_) => 4006,
            RelayError::ConnectionClosed => 4007,
            RelayError::InvalidRoom(_) => 4008,
            RelayError::MessageTooLarge { .. } => 4009,
            RelayError::SubscriptionLimit => 4010,
            RelayError::RoomLimit => 4011,
        }
    }

    /// Whether the connection survives this error.
    ///
    /// Recoverable errors are reported to the sender as an error event and
    /// the session continues; everything else closes the connection.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            RelayError::Auth(_)
                | RelayError::AuthTimeout
                | RelayError::IdentityMismatch { .. }
                | RelayError::Transport(_)
                | RelayError::ConnectionClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_vs_recoverable() {
        assert!(!RelayError::Auth("bad token".into()).is_recoverable());
        assert!(!RelayError::AuthTimeout.is_recoverable());
        assert!(!RelayError::ConnectionClosed.is_recoverable());
        assert!(RelayError::NotSubscribed("lobby".into()).is_recoverable());
        assert!(RelayError::StoreUnavailable("down".into()).is_recoverable());
        assert!(RelayError::MessageTooLarge { size: 2, limit: 1 }.is_recoverable());
    }

    #[test]
    fn test_kind_and_code_are_stable() {
        let err = RelayError::NotSubscribed("lobby".into());
        assert_eq!(err.kind(), "not_subscribed");
        assert_eq!(err.code(), 4004);

        let err = RelayError::IdentityMismatch {
            claimed: "mallory".into(),
            verified: "alice".into(),
        };
        assert_eq!(err.kind(), "identity_mismatch");
        assert_eq!(err.code(), 4003);
    }
}
