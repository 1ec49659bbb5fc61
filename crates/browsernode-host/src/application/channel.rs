//! Per-connection channel: outbound text queue plus a named event stream.
//!
//! The WebSocket task owns the socket.  Everything else talks to the
//! connection through a [`Channel`]:
//!
//! - outbound frames go into an unbounded queue drained by the socket writer
//!   (fire-and-forget, no backpressure);
//! - inbound frames are delivered to listeners registered per event name,
//!   the same way a browser `WebSocket` exposes `addEventListener`.
//!
//! Listeners receive the raw frame text.  Decoding is the caller's business
//! (see [`crate::application::proxy_client`]).

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc::UnboundedSender;

/// Listener attached to a channel event stream; receives raw frame text.
pub type RawListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Identifies one accepted connection for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identifies one listener attached to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(u64);

/// The outbound queue has no reader any more.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelClosed;

type ListenerMap = HashMap<String, Vec<(ListenerToken, RawListener)>>;

/// One accepted sandbox connection.
pub struct Channel {
    id: ConnectionId,
    outbound: UnboundedSender<String>,
    listeners: Mutex<ListenerMap>,
    next_token: AtomicU64,
}

impl Channel {
    pub fn new(id: ConnectionId, outbound: UnboundedSender<String>) -> Self {
        Self {
            id,
            outbound,
            listeners: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues one text frame for the socket writer.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelClosed`] once the connection's writer has gone away.
    pub fn send_text(&self, text: String) -> Result<(), ChannelClosed> {
        self.outbound.send(text).map_err(|_| ChannelClosed)
    }

    /// Attaches `listener` to the stream for `event`.
    pub fn add_listener(&self, event: &str, listener: RawListener) -> ListenerToken {
        let token = ListenerToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.lock()
            .entry(event.to_string())
            .or_default()
            .push((token, listener));
        token
    }

    /// Detaches the listener identified by `token` from `event`.
    ///
    /// Returns `false` if no such listener was attached.
    pub fn remove_listener(&self, event: &str, token: ListenerToken) -> bool {
        let mut listeners = self.lock();
        let Some(list) = listeners.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(t, _)| *t != token);
        let removed = list.len() != before;
        if list.is_empty() {
            listeners.remove(event);
        }
        removed
    }

    /// Number of listeners currently attached to `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.lock().get(event).map_or(0, Vec::len)
    }

    /// Delivers `data` to every listener of `event`.
    ///
    /// Listeners are invoked outside the lock, so a listener may add or remove
    /// listeners (including itself) while it runs.
    pub fn emit(&self, event: &str, data: &str) {
        let snapshot: Vec<RawListener> = self
            .lock()
            .get(event)
            .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in snapshot {
            listener(data);
        }
    }

    fn lock(&self) -> MutexGuard<'_, ListenerMap> {
        // A panicking listener must not wedge the connection.
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").field("id", &self.id).finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
