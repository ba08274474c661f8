//! Frame types for the Parley protocol.
//!
//! Frames are the unit of communication between chat clients and the relay.
//! Each frame is serialized with MessagePack and carried behind a length
//! prefix (see [`crate::codec`]).

use serde::{Deserialize, Serialize};

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Connect = 0x01,
    Connected = 0x02,
    Join = 0x03,
    Leave = 0x04,
    Send = 0x05,
    Message = 0x06,
    Presence = 0x07,
    History = 0x08,
    Ack = 0x09,
    Error = 0x0A,
    Ping = 0x0B,
    Pong = 0x0C,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Connect),
            0x02 => Ok(FrameType::Connected),
            0x03 => Ok(FrameType::Join),
            0x04 => Ok(FrameType::Leave),
            0x05 => Ok(FrameType::Send),
            0x06 => Ok(FrameType::Message),
            0x07 => Ok(FrameType::Presence),
            0x08 => Ok(FrameType::History),
            0x09 => Ok(FrameType::Ack),
            0x0A => Ok(FrameType::Error),
            0x0B => Ok(FrameType::Ping),
            0x0C => Ok(FrameType::Pong),
            _ => Err("Invalid frame type"),
        }
    }
}

/// A chat message as it appears on the wire.
///
/// `seq` is the store-assigned per-room sequence number; it is the canonical
/// order of messages within a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Room the message belongs to.
    pub room: String,
    /// Verified identity of the sender.
    pub sender: String,
    /// Message text.
    pub body: String,
    /// Per-room sequence number assigned at append time.
    pub seq: u64,
    /// Server timestamp in milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// A protocol frame.
///
/// Client-originated frames: `Connect`, `Join`, `Leave`, `Send`, `Ping`.
/// Server-originated frames: `Connected`, `Message`, `Presence`, `History`,
/// `Ack`, `Error`, `Pong`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Initial handshake. Must be the first frame on a connection.
    #[serde(rename = "connect")]
    Connect {
        /// Protocol version.
        version: u8,
        /// Bearer credential, verified server-side.
        credential: String,
        /// Identity the client claims to hold. Rejected if it does not
        /// match the identity the credential verifies to.
        #[serde(skip_serializing_if = "Option::is_none")]
        identity: Option<String>,
    },

    /// Handshake accepted; the connection is authenticated.
    #[serde(rename = "connected")]
    Connected {
        /// Unique connection identifier.
        connection_id: String,
        /// Verified identity bound to this connection.
        identity: String,
        /// Negotiated protocol version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Join a room.
    #[serde(rename = "join")]
    Join {
        /// Request ID for acknowledgment.
        id: u64,
        /// Room to join.
        room: String,
    },

    /// Leave a room.
    #[serde(rename = "leave")]
    Leave {
        /// Request ID for acknowledgment.
        id: u64,
        /// Room to leave.
        room: String,
    },

    /// Send a message to a joined room.
    #[serde(rename = "send")]
    Send {
        /// Optional request ID for acknowledgment.
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        /// Target room.
        room: String,
        /// Message text.
        body: String,
    },

    /// A message delivered to a room subscriber.
    #[serde(rename = "message")]
    Message {
        /// Room the message was sent to.
        room: String,
        /// Verified identity of the sender.
        sender: String,
        /// Message text.
        body: String,
        /// Per-room sequence number.
        seq: u64,
        /// Server timestamp in milliseconds.
        timestamp: u64,
    },

    /// Presence snapshot push: all identities currently online.
    #[serde(rename = "presence")]
    Presence {
        /// Online identities, sorted.
        online: Vec<String>,
    },

    /// Room history, sent in response to a join.
    #[serde(rename = "history")]
    History {
        /// Request ID of the join this answers.
        id: u64,
        /// Room the history belongs to.
        room: String,
        /// Messages in store order.
        messages: Vec<WireMessage>,
    },

    /// Acknowledgment of a request.
    #[serde(rename = "ack")]
    Ack {
        /// ID of the acknowledged request.
        id: u64,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// ID of the failed request (0 if not applicable).
        id: u64,
        /// Stable machine-readable error kind, e.g. `not_subscribed`.
        kind: String,
        /// Numeric error code.
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        /// Optional timestamp.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from ping.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Connect { .. } => FrameType::Connect,
            Frame::Connected { .. } => FrameType::Connected,
            Frame::Join { .. } => FrameType::Join,
            Frame::Leave { .. } => FrameType::Leave,
            Frame::Send { .. } => FrameType::Send,
            Frame::Message { .. } => FrameType::Message,
            Frame::Presence { .. } => FrameType::Presence,
            Frame::History { .. } => FrameType::History,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
        }
    }

    /// Create a new Connect frame.
    #[must_use]
    pub fn connect(version: u8, credential: impl Into<String>) -> Self {
        Frame::Connect {
            version,
            credential: credential.into(),
            identity: None,
        }
    }

    /// Create a Connect frame that also claims an identity.
    #[must_use]
    pub fn connect_as(
        version: u8,
        credential: impl Into<String>,
        identity: impl Into<String>,
    ) -> Self {
        Frame::Connect {
            version,
            credential: credential.into(),
            identity: Some(identity.into()),
        }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(
        connection_id: impl Into<String>,
        identity: impl Into<String>,
        version: u8,
        heartbeat: u32,
    ) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            identity: identity.into(),
            version,
            heartbeat,
        }
    }

    /// Create a new Join frame.
    #[must_use]
    pub fn join(id: u64, room: impl Into<String>) -> Self {
        Frame::Join {
            id,
            room: room.into(),
        }
    }

    /// Create a new Leave frame.
    #[must_use]
    pub fn leave(id: u64, room: impl Into<String>) -> Self {
        Frame::Leave {
            id,
            room: room.into(),
        }
    }

    /// Create a new Send frame.
    #[must_use]
    pub fn send(room: impl Into<String>, body: impl Into<String>) -> Self {
        Frame::Send {
            id: None,
            room: room.into(),
            body: body.into(),
        }
    }

    /// Create a new Send frame with ID for acknowledgment.
    #[must_use]
    pub fn send_with_ack(id: u64, room: impl Into<String>, body: impl Into<String>) -> Self {
        Frame::Send {
            id: Some(id),
            room: room.into(),
            body: body.into(),
        }
    }

    /// Create a Message frame from a wire message.
    #[must_use]
    pub fn message(msg: WireMessage) -> Self {
        Frame::Message {
            room: msg.room,
            sender: msg.sender,
            body: msg.body,
            seq: msg.seq,
            timestamp: msg.timestamp,
        }
    }

    /// Create a Presence frame.
    #[must_use]
    pub fn presence(online: Vec<String>) -> Self {
        Frame::Presence { online }
    }

    /// Create a History frame.
    #[must_use]
    pub fn history(id: u64, room: impl Into<String>, messages: Vec<WireMessage>) -> Self {
        Frame::History {
            id,
            room: room.into(),
            messages,
        }
    }

    /// Create a new Ack frame.
    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(id: u64, kind: impl Into<String>, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            kind: kind.into(),
            code,
            message: message.into(),
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type() {
        let join = Frame::join(1, "lobby");
        assert_eq!(join.frame_type(), FrameType::Join);

        let send = Frame::send("lobby", "hello");
        assert_eq!(send.frame_type(), FrameType::Send);

        let err = Frame::error(1, "not_subscribed", 4004, "not in room");
        assert_eq!(err.frame_type(), FrameType::Error);
    }

    #[test]
    fn test_frame_type_conversion() {
        for raw in 0x01..=0x0C_u8 {
            let ft = FrameType::try_from(raw).unwrap();
            assert_eq!(u8::from(ft), raw);
        }
        assert!(FrameType::try_from(0x0D).is_err());
        assert!(FrameType::try_from(0).is_err());
    }

    #[test]
    fn test_connect_claimed_identity() {
        let frame = Frame::connect_as(1, "tok-1", "alice");
        match frame {
            Frame::Connect { identity, .. } => assert_eq!(identity.as_deref(), Some("alice")),
            _ => panic!("expected Connect"),
        }
    }

    #[test]
    fn test_message_from_wire() {
        let msg = WireMessage {
            room: "lobby".into(),
            sender: "alice".into(),
            body: "hi".into(),
            seq: 7,
            timestamp: 1_700_000_000_000,
        };
        match Frame::message(msg) {
            Frame::Message { room, seq, .. } => {
                assert_eq!(room, "lobby");
                assert_eq!(seq, 7);
            }
            _ => panic!("expected Message"),
        }
    }
}
