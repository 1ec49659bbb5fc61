//! Text codec for channel frames.
//!
//! Wire format: one JSON document per WebSocket text frame.
//!
//! ```text
//! control: {"__controller":true,"__type":<kind>,"__payload":<any, optional>}
//! rpc:     <any JSON value>
//! ```

use serde_json::{Map, Value};
use thiserror::Error;

use crate::protocol::messages::{
    ControlKind, ProxyMessage, CONTROL_FIELD, KIND_FIELD, PAYLOAD_FIELD,
};

/// Errors that can occur while decoding a frame.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The frame text is not a JSON document.
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(String),

    /// A control envelope has no string `__type` field.
    #[error("control envelope is missing its `__type` field")]
    MissingKind,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`ProxyMessage`] into the text of one frame.
///
/// RPC values are written verbatim.  Control envelopes omit `__payload` when
/// the payload is `null`.
///
/// # Examples
///
/// ```rust
/// use browsernode_core::{decode_frame, encode_frame, ProxyMessage};
///
/// let text = encode_frame(&ProxyMessage::ready());
/// assert_eq!(text, r#"{"__controller":true,"__type":"READY"}"#);
/// assert_eq!(decode_frame(&text).unwrap(), ProxyMessage::ready());
/// ```
pub fn encode_frame(msg: &ProxyMessage) -> String {
    match msg {
        ProxyMessage::Rpc(value) => value.to_string(),
        ProxyMessage::Control { kind, payload } => {
            let mut envelope = Map::new();
            envelope.insert(CONTROL_FIELD.to_string(), Value::Bool(true));
            envelope.insert(KIND_FIELD.to_string(), Value::String(kind.as_str().to_string()));
            if !payload.is_null() {
                envelope.insert(PAYLOAD_FIELD.to_string(), payload.clone());
            }
            Value::Object(envelope).to_string()
        }
    }
}

/// Decodes the text of one frame.
///
/// Any JSON value that is not an object with `__controller: true` decodes to
/// [`ProxyMessage::Rpc`].
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidJson`] for non-JSON text and
/// [`ProtocolError::MissingKind`] for a control envelope without a kind.
pub fn decode_frame(text: &str) -> Result<ProxyMessage, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

    if !ProxyMessage::looks_like_control(&value) {
        return Ok(ProxyMessage::Rpc(value));
    }

    let kind = value
        .get(KIND_FIELD)
        .and_then(Value::as_str)
        .map(ControlKind::from_wire)
        .ok_or(ProtocolError::MissingKind)?;

    let payload = value.get(PAYLOAD_FIELD).cloned().unwrap_or(Value::Null);

    Ok(ProxyMessage::Control { kind, payload })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
