//! # parley-protocol
//!
//! Wire protocol definitions for the Parley chat relay.
//!
//! This crate defines the binary protocol spoken between chat clients and
//! the relay server: frame types, the MessagePack codec, and versioning.
//!
//! ## Frame Types
//!
//! - `Connect` / `Connected` - Authentication handshake
//! - `Join` / `Leave` - Room membership
//! - `Send` / `Message` - Chat messages in and out
//! - `Presence` - Online-identity snapshot pushes
//! - `History` - Room hydration on join
//! - `Ack` / `Error` - Acknowledgments and errors
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, Frame};
//!
//! let frame = Frame::send("lobby", "Hello, world!");
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{Frame, FrameType, WireMessage};
pub use version::{Version, PROTOCOL_VERSION};
