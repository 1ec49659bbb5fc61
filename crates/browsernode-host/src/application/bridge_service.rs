//! ProxyBridge: accepts the sandbox connection, runs the handshake, and owns
//! the backend slot the API server reads from.
//!
//! # Handshake
//!
//! ```text
//! host                               sandbox
//!  │  accept                            │
//!  │── SETUP {config} ─────────────────►│
//!  │                                    │  boots the node
//!  │◄──────────────────────────── READY │
//!  │  backend installed, online = true  │
//!  │◄═══════════ RPC frames ═══════════►│
//! ```
//!
//! Until `READY` arrives the backend slot is empty and API requests are
//! refused.  Non-control frames that arrive before `READY` are a protocol
//! violation and are dropped with a warning.
//!
//! # Single connection
//!
//! Only one sandbox may be connected at a time.  A second connection is
//! refused while the first is live, unless the bridge runs in debug mode
//! (which lets a developer open the page in a second tab).
//!
//! Closing the connection frees the slot but leaves the backend installed;
//! requests that reach it afterwards fail on `post` with
//! [`BridgeError::ChannelClosed`].

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use browsernode_core::protocol::messages::{CLOSE_EVENT, MESSAGE_EVENT};
use browsernode_core::{decode_frame, encode_frame, ControlKind, NodeConfig, ProxyMessage};

use super::channel::{Channel, ConnectionId};
use super::proxy_client::ProxyClient;

/// Errors raised by the bridge and its capability object.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Another sandbox connection is already live.
    #[error("sandbox slot already held by {holder}")]
    SlotOccupied { holder: ConnectionId },

    /// The connection's writer has gone away.
    #[error("channel {0} is closed")]
    ChannelClosed(ConnectionId),

    /// A caller tried to post a handshake envelope.
    #[error("control envelopes cannot be posted through the proxy client")]
    ControlMessage,
}

/// What the bridge did with one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// `READY` arrived; the backend is now installed.
    HandshakeComplete,
    /// An RPC frame was delivered to the `message` stream.
    Dispatched,
    /// The frame was dropped.
    Ignored(IgnoreReason),
}

/// Why a frame was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Not valid JSON, or a control envelope without a kind.
    Undecodable,
    /// A control envelope other than `READY`.
    UnexpectedControl,
    /// An RPC frame before `READY`.
    BeforeHandshake,
}

/// Set of live sandbox connections.
#[derive(Debug, Default)]
pub struct ConnectionSlot {
    active: BTreeSet<ConnectionId>,
}

impl ConnectionSlot {
    pub fn is_occupied(&self) -> bool {
        !self.active.is_empty()
    }

    /// The longest-held connection, if any.
    pub fn holder(&self) -> Option<ConnectionId> {
        self.active.iter().next().copied()
    }

    fn occupy(&mut self, id: ConnectionId) {
        self.active.insert(id);
    }

    fn release(&mut self, id: ConnectionId) -> bool {
        self.active.remove(&id)
    }
}

/// Per-connection handshake state, owned by the socket task.
#[derive(Debug)]
pub struct Session {
    channel: Arc<Channel>,
    handshake_complete: bool,
}

impl Session {
    pub fn id(&self) -> ConnectionId {
        self.channel.id()
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    pub fn is_ready(&self) -> bool {
        self.handshake_complete
    }
}

#[derive(Debug, Default)]
struct BridgeState {
    slot: ConnectionSlot,
    backend: Option<Arc<ProxyClient>>,
}

/// Bridges the API server to the sandbox over one channel.
pub struct ProxyBridge {
    node_config: Arc<NodeConfig>,
    allow_multiple: bool,
    state: Mutex<BridgeState>,
    online: watch::Sender<bool>,
    next_connection: AtomicU64,
}

impl ProxyBridge {
    /// Creates a bridge that hands `node_config` to each sandbox in `SETUP`.
    ///
    /// With `allow_multiple` set, concurrent connections are accepted.
    pub fn new(node_config: Arc<NodeConfig>, allow_multiple: bool) -> Self {
        let (online, _) = watch::channel(false);
        Self {
            node_config,
            allow_multiple,
            state: Mutex::new(BridgeState::default()),
            online,
            next_connection: AtomicU64::new(1),
        }
    }

    /// Accepts a new connection whose outbound frames go to `outbound`.
    ///
    /// On success the connection holds the slot and `SETUP` has already been
    /// queued as its first outbound frame.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::SlotOccupied`] when another connection is live and
    ///   the bridge is not in debug mode.
    /// - [`BridgeError::ChannelClosed`] when `outbound` has no reader.
    pub fn accept(&self, outbound: UnboundedSender<String>) -> Result<Session, BridgeError> {
        let id = ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed));
        let channel = Arc::new(Channel::new(id, outbound));

        {
            let mut state = self.state();
            if let Some(holder) = state.slot.holder() {
                if !self.allow_multiple {
                    warn!(conn = %id, %holder, "refusing second sandbox connection");
                    return Err(BridgeError::SlotOccupied { holder });
                }
                debug!(conn = %id, %holder, "debug mode: accepting additional connection");
            }
            state.slot.occupy(id);
        }

        let setup = encode_frame(&ProxyMessage::setup(self.node_config.raw().clone()));
        if channel.send_text(setup).is_err() {
            self.state().slot.release(id);
            return Err(BridgeError::ChannelClosed(id));
        }

        info!(conn = %id, "sandbox connected, SETUP sent");
        Ok(Session {
            channel,
            handshake_complete: false,
        })
    }

    /// Handles one inbound text frame on `session`.
    pub fn handle_frame(&self, session: &mut Session, text: &str) -> FrameOutcome {
        let conn = session.id();
        let message = match decode_frame(text) {
            Ok(m) => m,
            Err(e) => {
                warn!(%conn, "dropping frame: {e}");
                return FrameOutcome::Ignored(IgnoreReason::Undecodable);
            }
        };

        match message {
            ProxyMessage::Control {
                kind: ControlKind::Ready,
                ..
            } => {
                let client = Arc::new(ProxyClient::new(Arc::clone(&session.channel)));
                self.state().backend = Some(client);
                session.handshake_complete = true;
                self.online.send_replace(true);
                info!(%conn, "sandbox READY, backend installed");
                FrameOutcome::HandshakeComplete
            }
            ProxyMessage::Control { kind, .. } => {
                debug!(%conn, %kind, "ignoring control frame from sandbox");
                FrameOutcome::Ignored(IgnoreReason::UnexpectedControl)
            }
            ProxyMessage::Rpc(_) if !session.handshake_complete => {
                warn!(%conn, "RPC frame before READY, dropping");
                FrameOutcome::Ignored(IgnoreReason::BeforeHandshake)
            }
            ProxyMessage::Rpc(_) => {
                session.channel.emit(MESSAGE_EVENT, text);
                FrameOutcome::Dispatched
            }
        }
    }

    /// Releases the slot held by `session` and notifies `close` listeners.
    pub fn release(&self, session: Session) {
        let conn = session.id();
        let freed = self.state().slot.release(conn);
        session.channel.emit(CLOSE_EVENT, "null");
        if freed {
            info!(%conn, "sandbox disconnected");
        }
    }

    /// The installed backend, if the handshake has completed.
    pub fn backend(&self) -> Option<Arc<ProxyClient>> {
        self.state().backend.clone()
    }

    /// `true` once any sandbox has sent `READY`.
    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// `true` while a sandbox connection holds the slot.
    pub fn is_occupied(&self) -> bool {
        self.state().slot.is_occupied()
    }

    /// Resolves once the backend is installed.
    pub async fn wait_online(&self) {
        let mut rx = self.online.subscribe();
        // The sender lives in `self`, so `wait_for` cannot observe a close.
        let _ = rx.wait_for(|online| *online).await;
    }

    fn state(&self) -> MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
