//! # parley-core
//!
//! Presence registry, room router, and relay engine for the Parley chat
//! relay.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **PresenceRegistry** - Which identities are online, multi-device aware
//! - **RoomRouter** - Room membership and fan-out targeting
//! - **RelayEngine** - Connection lifecycle, persistence, delivery
//! - **IdentityVerifier / MessageStore** - Traits for the external
//!   collaborators (auth backend, durable storage)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────┐
//! │   Session   │────▶│ RelayEngine │────▶│  RoomRouter  │
//! └─────────────┘     └─────────────┘     └──────────────┘
//!                        │        │
//!                        ▼        ▼
//!               ┌──────────────┐ ┌──────────────────┐
//!               │ MessageStore │ │ PresenceRegistry │
//!               └──────────────┘ └──────────────────┘
//! ```
//!
//! A transport task calls [`RelayEngine::connect`] with the client's
//! credential and drives the returned [`Session`]: commands in
//! (`join` / `leave` / `send`), [`RelayEvent`] pushes out.

pub mod auth;
pub mod connection;
pub mod engine;
pub mod error;
pub mod message;
pub mod presence;
pub mod router;
pub mod store;

pub use auth::{IdentityVerifier, StaticTokenVerifier, VerifyError};
pub use connection::{ConnectionId, ConnectionState};
pub use engine::{EngineConfig, EngineStats, RelayEngine, RelayEvent, Session};
pub use error::RelayError;
pub use message::Message;
pub use presence::{Identity, PresenceChange, PresenceRegistry};
pub use router::{RoomId, RoomRouter, RouterConfig, RouterStats};
pub use store::{MemoryStore, MessageStore, StoreError};
