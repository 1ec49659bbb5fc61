//! Application layer: the sandbox channel and the handshake around it.
//!
//! Nothing here touches sockets or the filesystem.  The API server hands the
//! bridge an outbound queue per WebSocket and feeds it inbound text; the
//! bridge decides what those frames mean.
//!
//! # Sub-modules
//!
//! - **`channel`**        – One accepted connection: outbound queue plus
//!   named event streams.
//! - **`proxy_client`**   – The post/subscribe/unsubscribe capability the API
//!   routes use to talk to the node.
//! - **`bridge_service`** – Connection slot, `SETUP`/`READY` handshake and the
//!   backend slot.

pub mod bridge_service;
pub mod channel;
pub mod proxy_client;

pub use bridge_service::{BridgeError, FrameOutcome, IgnoreReason, ProxyBridge, Session};
pub use channel::{Channel, ConnectionId};
pub use proxy_client::{Callback, ProxyClient, ProxyEvent};
