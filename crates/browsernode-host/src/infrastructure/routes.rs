//! The route-table seam and the default relaying table.
//!
//! The node's HTTP API is not implemented by the host.  A [`RouteTable`]
//! registers `/api/*` handlers on the server's router and reaches the node
//! through the capability object installed by the bridge
//! (`ApiState::bridge.backend()`).
//!
//! [`RelayRoutes`] is the table the binary uses.  It forwards each request
//! to the sandbox as one frame and waits for the frame that answers it:
//!
//! ```text
//! request  {"id", "method", "path", "query", "body": base64}
//! response {"id", "status", "headers"?, "body"?: base64}
//! ```
//!
//! Correlation is by `id`.  Each request subscribes its own callback on the
//! `message` stream and unsubscribes it when done.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use browsernode_core::protocol::messages::{CLOSE_EVENT, MESSAGE_EVENT};

use crate::application::{Callback, ProxyClient, ProxyEvent};
use crate::infrastructure::api_server::{api_error, ApiState};

/// Largest request body relayed to the sandbox.
pub const MAX_RELAY_BODY: usize = 16 * 1024 * 1024;

/// Registers the node API handlers.
pub trait RouteTable: Send + Sync {
    fn register(&self, router: Router<ApiState>) -> Router<ApiState>;
}

/// Relays every `/api/*` request through the capability object.
#[derive(Debug, Clone, Copy)]
pub struct RelayRoutes {
    timeout: Duration,
}

impl RelayRoutes {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl RouteTable for RelayRoutes {
    fn register(&self, router: Router<ApiState>) -> Router<ApiState> {
        let timeout = self.timeout;
        let handler = move |State(state): State<ApiState>, request: Request| async move {
            relay(state, timeout, request).await
        };
        // `/api/*rest` needs at least one segment after the prefix.
        router
            .route("/api/", any(handler.clone()))
            .route("/api/*rest", any(handler))
    }
}

#[derive(Debug)]
enum RelayOutcome {
    Reply(Value),
    Closed,
}

async fn relay(state: ApiState, timeout: Duration, request: Request) -> Response {
    let Some(backend) = state.bridge.backend() else {
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, "Daemon is not online");
    };

    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, MAX_RELAY_BODY).await {
        Ok(body) => body,
        Err(e) => {
            return api_error(
                StatusCode::BAD_REQUEST,
                &format!("could not read request body: {e}"),
            )
        }
    };

    let id = Uuid::new_v4().to_string();
    let frame = json!({
        "id": id,
        "method": parts.method.as_str(),
        "path": parts.uri.path(),
        "query": parts.uri.query().unwrap_or(""),
        "body": BASE64_STANDARD.encode(&body),
    });

    let (tx, rx) = oneshot::channel();
    let (on_message, on_close) = correlate(id.clone(), tx);
    backend.subscribe(MESSAGE_EVENT, &on_message);
    backend.subscribe(CLOSE_EVENT, &on_close);

    let outcome = match backend.post(&frame) {
        Ok(()) => tokio::time::timeout(timeout, rx).await,
        Err(e) => {
            detach(&backend, &on_message, &on_close);
            return api_error(StatusCode::BAD_GATEWAY, &e.to_string());
        }
    };
    detach(&backend, &on_message, &on_close);

    match outcome {
        Ok(Ok(RelayOutcome::Reply(reply))) => {
            debug!(%id, "relay answered");
            reply_to_response(&reply)
        }
        Ok(Ok(RelayOutcome::Closed)) | Ok(Err(_)) => api_error(
            StatusCode::BAD_GATEWAY,
            "the node disconnected before answering",
        ),
        Err(_) => {
            warn!(%id, path = parts.uri.path(), "relay timed out after {timeout:?}");
            api_error(StatusCode::GATEWAY_TIMEOUT, "the node did not answer in time")
        }
    }
}

/// Builds the two callbacks that complete `tx`: one matching the reply by
/// `id`, one firing when the channel closes.
fn correlate(id: String, tx: oneshot::Sender<RelayOutcome>) -> (Callback, Callback) {
    let slot = Arc::new(Mutex::new(Some(tx)));

    let reply_slot = Arc::clone(&slot);
    let on_message = Callback::new(move |event: ProxyEvent| {
        if event.data.get("id").and_then(Value::as_str) == Some(id.as_str()) {
            complete(&reply_slot, RelayOutcome::Reply(event.data));
        }
    });
    let on_close = Callback::new(move |_| complete(&slot, RelayOutcome::Closed));
    (on_message, on_close)
}

// First outcome wins; later ones are dropped.
fn complete(slot: &Mutex<Option<oneshot::Sender<RelayOutcome>>>, outcome: RelayOutcome) {
    if let Some(tx) = slot.lock().unwrap_or_else(|e| e.into_inner()).take() {
        let _ = tx.send(outcome);
    }
}

fn detach(backend: &ProxyClient, on_message: &Callback, on_close: &Callback) {
    backend.unsubscribe(MESSAGE_EVENT, on_message);
    backend.unsubscribe(CLOSE_EVENT, on_close);
}

fn reply_to_response(reply: &Value) -> Response {
    let status = reply
        .get("status")
        .and_then(Value::as_u64)
        .and_then(|s| u16::try_from(s).ok())
        .and_then(|s| StatusCode::from_u16(s).ok())
        .unwrap_or(StatusCode::OK);

    let body = match reply.get("body").and_then(Value::as_str) {
        Some(encoded) => match BASE64_STANDARD.decode(encoded) {
            Ok(bytes) => bytes,
            Err(e) => {
                return api_error(
                    StatusCode::BAD_GATEWAY,
                    &format!("invalid body from node: {e}"),
                )
            }
        },
        None => Vec::new(),
    };

    let mut builder = Response::builder().status(status);
    if let Some(headers) = reply.get("headers").and_then(Value::as_object) {
        for (name, value) in headers {
            if let Some(value) = value.as_str() {
                builder = builder.header(name.as_str(), value);
            }
        }
    }

    builder.body(Body::from(body)).unwrap_or_else(|e| {
        api_error(
            StatusCode::BAD_GATEWAY,
            &format!("invalid response from node: {e}"),
        )
    })
}
