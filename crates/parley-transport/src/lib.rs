//! # parley-transport
//!
//! Transport abstraction layer for the Parley chat relay.
//!
//! The relay engine never touches a socket; it talks to clients through
//! the `Transport` and `Connection` traits defined here. That keeps the
//! fan-out logic testable without a live network stack, and leaves room
//! for transports other than WebSocket.
//!
//! ```rust,ignore
//! use parley_transport::{Connection, Transport};
//!
//! async fn handle_connection(mut conn: Box<dyn Connection>) {
//!     while let Ok(Some(frame)) = conn.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{Connection, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;
