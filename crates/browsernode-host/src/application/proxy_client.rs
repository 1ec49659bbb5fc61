//! ProxyClient: the capability object handed to the API server once the
//! sandbox is ready.
//!
//! It exposes exactly three operations over the live channel:
//!
//! - `post` sends one JSON frame to the sandbox;
//! - `subscribe` attaches a callback to a named event stream, decoding each
//!   raw frame as JSON before the callback sees it;
//! - `unsubscribe` detaches a callback previously passed to `subscribe`.
//!
//! # Callback identity
//!
//! The same [`Callback`] value (or a clone of it) must be passed to
//! `unsubscribe` that was passed to `subscribe`.  The client keeps one
//! handle per `(event, callback)` pair: one callback may listen on several
//! events, and subscribing the same pair again replaces its previous
//! listener.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use browsernode_core::ProxyMessage;

use super::bridge_service::BridgeError;
use super::channel::{Channel, ListenerToken, RawListener};

/// One decoded event delivered to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyEvent {
    /// Event stream name, e.g. `"message"`.
    pub name: String,
    /// The frame body, decoded as JSON.
    pub data: Value,
}

/// Stable identity of a [`Callback`]; shared by all of its clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(Uuid);

/// A subscriber function with a stable identity.
#[derive(Clone)]
pub struct Callback {
    id: CallbackId,
    f: Arc<dyn Fn(ProxyEvent) + Send + Sync>,
}

impl Callback {
    pub fn new(f: impl Fn(ProxyEvent) + Send + Sync + 'static) -> Self {
        Self {
            id: CallbackId(Uuid::new_v4()),
            f: Arc::new(f),
        }
    }

    pub fn id(&self) -> CallbackId {
        self.id
    }

    /// Runs the callback directly.
    pub fn invoke(&self, event: ProxyEvent) {
        (self.f)(event)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback").field("id", &self.id).finish()
    }
}

/// Post/subscribe/unsubscribe over one live sandbox channel.
pub struct ProxyClient {
    channel: Arc<Channel>,
    handles: Mutex<HashMap<(String, CallbackId), ListenerToken>>,
}

impl ProxyClient {
    pub fn new(channel: Arc<Channel>) -> Self {
        Self {
            channel,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Serializes `message` and sends it to the sandbox.
    ///
    /// Fire-and-forget: success means the frame was queued, not delivered.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::ControlMessage`] if `message` is shaped like a control
    ///   envelope; those are reserved for the handshake.
    /// - [`BridgeError::ChannelClosed`] if the connection is gone.
    pub fn post(&self, message: &Value) -> Result<(), BridgeError> {
        if ProxyMessage::looks_like_control(message) {
            return Err(BridgeError::ControlMessage);
        }
        self.channel
            .send_text(message.to_string())
            .map_err(|_| BridgeError::ChannelClosed(self.channel.id()))
    }

    /// Attaches `callback` to the `event` stream.
    ///
    /// Each raw frame is decoded as JSON before `callback` runs.  Frames that
    /// do not decode are logged and skipped.
    pub fn subscribe(&self, event: &str, callback: &Callback) {
        let name = event.to_string();
        let target = callback.clone();
        let wrapped: RawListener = Arc::new(move |raw: &str| {
            match serde_json::from_str::<Value>(raw) {
                Ok(data) => target.invoke(ProxyEvent {
                    name: name.clone(),
                    data,
                }),
                Err(e) => warn!(event = %name, "skipping undecodable frame: {e}"),
            }
        });

        let token = self.channel.add_listener(event, wrapped);
        let previous = self
            .handles()
            .insert((event.to_string(), callback.id()), token);
        if let Some(prev) = previous {
            self.channel.remove_listener(event, prev);
        }
        debug!(conn = %self.channel.id(), event, "subscribed");
    }

    /// Detaches `callback` from the `event` stream.
    ///
    /// A callback that was never subscribed to `event` is ignored.
    pub fn unsubscribe(&self, event: &str, callback: &Callback) {
        let removed = self.handles().remove(&(event.to_string(), callback.id()));
        if let Some(token) = removed {
            self.channel.remove_listener(event, token);
            debug!(conn = %self.channel.id(), event, "unsubscribed");
        }
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<(String, CallbackId), ListenerToken>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for ProxyClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyClient")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
