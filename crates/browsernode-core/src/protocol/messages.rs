//! Envelope types for the sandbox channel.
//!
//! Every frame on the channel is one JSON document.  Two kinds exist:
//!
//! ```text
//! Control: {"__controller":true,"__type":"SETUP","__payload":{...config...}}
//!          {"__controller":true,"__type":"READY"}
//! RPC:     any other JSON value, forwarded verbatim
//! ```
//!
//! Control envelopes drive the handshake.  `SETUP` flows host → sandbox and
//! carries the node configuration; `READY` flows sandbox → host once the node
//! inside the browser is running.  RPC frames are never inspected by the
//! bridge; request/response correlation is the route table's concern.

use std::fmt;

use serde_json::Value;

/// JSON field that marks an object as a control envelope.
pub const CONTROL_FIELD: &str = "__controller";

/// JSON field holding the control kind (`"SETUP"` / `"READY"`).
pub const KIND_FIELD: &str = "__type";

/// JSON field holding the control payload.
pub const PAYLOAD_FIELD: &str = "__payload";

/// Channel event fired for every inbound RPC frame after the handshake.
pub const MESSAGE_EVENT: &str = "message";

/// Channel event fired once when the connection ends.
pub const CLOSE_EVENT: &str = "close";

/// The reserved control kinds.
///
/// Unknown kinds are preserved in [`ControlKind::Other`] so that the bridge
/// can log and ignore them instead of failing to decode the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlKind {
    /// Host → sandbox: carries the node configuration.
    Setup,
    /// Sandbox → host: the node is running and RPC may begin.
    Ready,
    /// Any other control kind.  Never produced by the host.
    Other(String),
}

impl ControlKind {
    /// Returns the wire string for this kind.
    pub fn as_str(&self) -> &str {
        match self {
            ControlKind::Setup => "SETUP",
            ControlKind::Ready => "READY",
            ControlKind::Other(kind) => kind,
        }
    }

    /// Parses a wire string.  Never fails; unknown strings map to `Other`.
    pub fn from_wire(kind: &str) -> Self {
        match kind {
            "SETUP" => ControlKind::Setup,
            "READY" => ControlKind::Ready,
            other => ControlKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded channel frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ProxyMessage {
    /// A control envelope (`__controller: true`).
    Control {
        kind: ControlKind,
        /// `Value::Null` when the envelope carries no payload.
        payload: Value,
    },
    /// Opaque RPC traffic.
    Rpc(Value),
}

impl ProxyMessage {
    /// Builds the `SETUP` envelope carrying the node configuration.
    pub fn setup(config: Value) -> Self {
        ProxyMessage::Control {
            kind: ControlKind::Setup,
            payload: config,
        }
    }

    /// Builds the `READY` envelope.
    pub fn ready() -> Self {
        ProxyMessage::Control {
            kind: ControlKind::Ready,
            payload: Value::Null,
        }
    }

    /// Returns `true` when `value` has the shape of a control envelope.
    ///
    /// Used to keep RPC traffic control-message-free: the capability object
    /// refuses to post anything this function accepts.
    pub fn looks_like_control(value: &Value) -> bool {
        value
            .get(CONTROL_FIELD)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}
