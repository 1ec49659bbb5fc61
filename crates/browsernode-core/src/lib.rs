//! # browsernode-core
//!
//! Shared library for the browser node host containing the channel wire
//! protocol, the multiaddress type used for binding and discovery, and the
//! parsed node configuration.
//!
//! It has zero dependencies on OS APIs, async runtimes, or network sockets.
//!
//! # Architecture overview
//!
//! The storage node runs inside a headless browser (the *sandbox*).  The host
//! process cannot call into it directly; the two sides only exchange JSON
//! text frames over a single WebSocket channel.  This crate defines:
//!
//! - **`protocol`** – How frames travel over the channel.  Control envelopes
//!   (`SETUP`, `READY`) drive the handshake; every other frame is opaque RPC
//!   traffic forwarded verbatim.
//!
//! - **`domain`** – Pure data types: the [`BindAddress`] multiaddress and the
//!   [`NodeConfig`] read from the repository.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `browsernode_core::BindAddress` instead of the full module path.
pub use domain::multiaddr::{BindAddress, Host, MultiaddrError, Transport};
pub use domain::node_config::{ConfigError, NodeConfig};
pub use protocol::codec::{decode_frame, encode_frame, ProtocolError};
pub use protocol::messages::{ControlKind, ProxyMessage};
