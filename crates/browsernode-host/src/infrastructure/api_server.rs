//! ApiServer: the host's HTTP endpoint.
//!
//! One axum router serves everything the sandbox and API callers need:
//!
//! ```text
//! GET /                   entry page, or the sandbox channel (WebSocket upgrade)
//! GET /postmsg.bundle.js  bridge script
//! GET /ipfs.js            node runtime bundle
//! *   /api/*              route table, behind the online guard
//! ```
//!
//! # Middleware order
//!
//! ```text
//! request ─► default_headers ─► online_guard ─► router
//! ```
//!
//! `default_headers` is outermost so that guard rejections and `OPTIONS`
//! pre-flight answers carry the same CORS headers as normal responses.
//!
//! # Lifecycle
//!
//! [`ApiServer::start`] binds, spawns the serve task and returns a
//! [`RunningServer`] that knows the bound address.  [`RunningServer::stop`]
//! never fails: errors while stopping are logged and shutdown completes.

use std::borrow::Cow;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_EXPOSE_HEADERS, CONTENT_TYPE,
};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use thiserror::Error;
use tokio::net::{lookup_host, TcpListener};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use browsernode_core::domain::DnsFamily;
use browsernode_core::{BindAddress, Host, Transport};

use crate::application::ProxyBridge;
use crate::domain::startup::StartupError;
use crate::infrastructure::assets::{
    AssetError, AssetResolver, AssetStream, HTML_CONTENT_TYPE, JS_CONTENT_TYPE,
};
use crate::infrastructure::routes::RouteTable;

/// Path prefix gated by the online guard.
pub const API_PREFIX: &str = "/api/";

/// Custom headers made visible to cross-origin callers.
pub const CUSTOM_HEADERS: &str = "X-Stream-Output, X-Chunked-Output, X-Content-Length";

const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";

/// How long `stop` waits for in-flight requests before aborting the server.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Failures while running or stopping the server.  Never fatal.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("API server is not running")]
    NotRunning,

    #[error("API server task failed: {0}")]
    Task(#[from] JoinError),

    #[error("API server I/O error: {0}")]
    Serve(#[source] io::Error),

    #[error("API server did not stop within {0:?}")]
    StopTimeout(Duration),
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ApiState {
    pub bridge: Arc<ProxyBridge>,
    pub assets: Arc<AssetResolver>,
    pub node_hash: Arc<str>,
    pub node_version: Arc<str>,
    pub debug: bool,
}

/// Builds the JSON error body API callers expect.
pub fn api_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({"Message": message, "Code": 0, "Type": "error"})),
    )
        .into_response()
}

/// Assembles the full router: asset routes, the route table, guard and
/// default headers.
pub fn build_router(state: ApiState, routes: &dyn RouteTable) -> Router {
    let router = Router::new()
        .route("/", get(entry_or_channel))
        .route("/postmsg.bundle.js", get(bridge_script))
        .route("/ipfs.js", get(node_runtime));

    routes
        .register(router)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), online_guard))
        .layer(middleware::from_fn_with_state(state.clone(), default_headers))
        .with_state(state)
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

/// A configured, not yet bound server.
pub struct ApiServer {
    requested: BindAddress,
    router: Router,
}

impl ApiServer {
    pub fn new(requested: BindAddress, router: Router) -> Self {
        Self { requested, router }
    }

    /// Binds the requested address and starts serving.
    ///
    /// The returned server reports the address actually bound, so a
    /// requested port of `0` comes back resolved.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError::Bind`] if the address is not TCP, does not
    /// resolve, or cannot be bound.
    pub async fn start(self) -> Result<RunningServer, StartupError> {
        let bind_error = |source: io::Error| StartupError::Bind {
            addr: self.requested.to_string(),
            source,
        };

        let listener = bind_listener(&self.requested).await.map_err(bind_error)?;
        let local = listener.local_addr().map_err(bind_error)?;
        let address = BindAddress::from_socket_addr(local);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let router = self.router;
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        info!("API server listening on {address}");
        Ok(RunningServer {
            address,
            shutdown: Mutex::new(Some(shutdown_tx)),
            task: Mutex::new(Some(task)),
        })
    }
}

/// A bound, serving API server.
pub struct RunningServer {
    address: BindAddress,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<io::Result<()>>>>,
}

impl RunningServer {
    /// The address actually bound.
    pub fn address(&self) -> &BindAddress {
        &self.address
    }

    /// The URI the sandbox browser opens.
    pub fn entry_uri(&self) -> String {
        format!("{}/", self.address.http_url())
    }

    /// Stops the server.  Failures are logged, never returned.
    pub async fn stop(&self) {
        match self.shutdown().await {
            Ok(()) => info!("API server stopped"),
            Err(e) => warn!("There were errors stopping the API server: {e}"),
        }
    }

    async fn shutdown(&self) -> Result<(), ServerError> {
        let tx = take(&self.shutdown);
        let task = take(&self.task);
        let (Some(tx), Some(mut task)) = (tx, task) else {
            return Err(ServerError::NotRunning);
        };

        let _ = tx.send(());
        match tokio::time::timeout(STOP_GRACE, &mut task).await {
            Ok(joined) => joined?.map_err(ServerError::Serve),
            Err(_) => {
                task.abort();
                Err(ServerError::StopTimeout(STOP_GRACE))
            }
        }
    }
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock().unwrap_or_else(|e| e.into_inner()).take()
}

async fn bind_listener(addr: &BindAddress) -> io::Result<TcpListener> {
    if addr.transport() != Transport::Tcp {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "the API address must use tcp",
        ));
    }

    match addr.host() {
        Host::Ip(ip) => TcpListener::bind(SocketAddr::new(*ip, addr.port())).await,
        Host::Dns { name, family } => {
            let candidates = lookup_host((name.as_str(), addr.port())).await?;
            let mut last_err = None;
            for candidate in candidates.filter(|c| family_matches(*family, c)) {
                match TcpListener::bind(candidate).await {
                    Ok(listener) => return Ok(listener),
                    Err(e) => last_err = Some(e),
                }
            }
            Err(last_err.unwrap_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("{name} did not resolve to a usable address"),
                )
            }))
        }
    }
}

fn family_matches(family: DnsFamily, addr: &SocketAddr) -> bool {
    match family {
        DnsFamily::Any => true,
        DnsFamily::V4 => addr.is_ipv4(),
        DnsFamily::V6 => addr.is_ipv6(),
    }
}

// ── Middleware ────────────────────────────────────────────────────────────────

async fn online_guard(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    if request.uri().path().starts_with(API_PREFIX) && state.bridge.backend().is_none() {
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, "Daemon is not online");
    }
    next.run(request).await
}

async fn default_headers(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let mut response = if method == Method::OPTIONS {
        let mut preflight = StatusCode::NO_CONTENT.into_response();
        preflight.headers_mut().insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        preflight
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(CUSTOM_HEADERS));
    headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, HeaderValue::from_static(CUSTOM_HEADERS));

    if state.debug {
        info!(
            %method,
            %path,
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request"
        );
    }
    response
}

// ── Asset handlers ────────────────────────────────────────────────────────────

async fn entry_or_channel(
    State(state): State<ApiState>,
    upgrade: Option<WebSocketUpgrade>,
) -> Response {
    if let Some(ws) = upgrade {
        let bridge = Arc::clone(&state.bridge);
        return ws.on_upgrade(move |socket| run_channel(socket, bridge));
    }
    match state.assets.resolve_entry_page().await {
        Ok(stream) => stream_response(HTML_CONTENT_TYPE, stream),
        Err(e) => asset_failure(e),
    }
}

async fn bridge_script(State(state): State<ApiState>) -> Response {
    match state.assets.resolve_bridge_script().await {
        Ok(stream) => stream_response(JS_CONTENT_TYPE, stream),
        Err(e) => asset_failure(e),
    }
}

async fn node_runtime(State(state): State<ApiState>) -> Response {
    let stream = state
        .assets
        .resolve_node_runtime(&state.node_hash, &state.node_version)
        .await;
    stream_response(JS_CONTENT_TYPE, stream)
}

async fn not_found() -> Response {
    StatusCode::NOT_FOUND.into_response()
}

fn stream_response(content_type: &'static str, stream: AssetStream) -> Response {
    ([(CONTENT_TYPE, content_type)], Body::from_stream(stream)).into_response()
}

fn asset_failure(err: AssetError) -> Response {
    warn!("asset unavailable: {err}");
    let status = match &err {
        AssetError::Read { source, .. } if source.kind() == io::ErrorKind::NotFound => {
            StatusCode::NOT_FOUND
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string()).into_response()
}

// ── Sandbox channel ───────────────────────────────────────────────────────────

/// Runs one upgraded sandbox connection until it closes.
///
/// The socket is split: a writer task drains the channel's outbound queue
/// while this task reads frames and hands them to the bridge.
async fn run_channel(socket: WebSocket, bridge: Arc<ProxyBridge>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let mut session = match bridge.accept(tx) {
        Ok(session) => session,
        Err(e) => {
            warn!("closing sandbox connection: {e}");
            let _ = sink
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: Cow::from("another sandbox is already connected"),
                })))
                .await;
            return;
        }
    };
    let conn = session.id();

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                debug!(%conn, "socket closed while writing");
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    warn!(%conn, "ignoring non-UTF-8 binary frame");
                    continue;
                }
            },
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => {
                debug!(%conn, "sandbox sent Close");
                break;
            }
            Err(e) => {
                debug!(%conn, "channel read error: {e}");
                break;
            }
        };
        bridge.handle_frame(&mut session, &text);
    }

    bridge.release(session);
    writer.abort();
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::HostConfig;
    use browsernode_core::NodeConfig;
    use tempfile::TempDir;

    struct NoRoutes;

    impl RouteTable for NoRoutes {
        fn register(&self, router: Router<ApiState>) -> Router<ApiState> {
            router
        }
    }

    fn state(dir: &TempDir) -> ApiState {
        let node_config = NodeConfig::from_json(r#"{"Addresses":{"API":"/ip4/127.0.0.1/tcp/0"}}"#)
            .unwrap();
        let config = HostConfig {
            repo_dir: dir.path().to_path_buf(),
            dist_dir: dir.path().to_path_buf(),
            ..HostConfig::default()
        };
        ApiState {
            bridge: Arc::new(ProxyBridge::new(Arc::new(node_config), false)),
            assets: Arc::new(AssetResolver::new(&config).unwrap()),
            node_hash: Arc::from("QmHash"),
            node_version: Arc::from("1.0.0"),
            debug: false,
        }
    }

    async fn start(dir: &TempDir) -> RunningServer {
        let router = build_router(state(dir), &NoRoutes);
        ApiServer::new("/ip4/127.0.0.1/tcp/0".parse().unwrap(), router)
            .start()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_start_resolves_ephemeral_port() {
        let dir = TempDir::new().unwrap();

        let server = start(&dir).await;

        assert_ne!(server.address().port(), 0);
        assert!(server.entry_uri().starts_with("http://127.0.0.1:"));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_guard_rejects_api_before_handshake() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let server = start(&dir).await;
        let url = format!("{}/api/v0/version", server.address().http_url());

        // Act
        let response = reqwest::get(&url).await.unwrap();

        // Assert
        assert_eq!(response.status().as_u16(), 500);
        assert_eq!(
            response.headers()["access-control-expose-headers"],
            CUSTOM_HEADERS
        );
        let body: serde_json::Value = serde_json::from_str(&response.text().await.unwrap()).unwrap();
        assert_eq!(
            body,
            json!({"Message": "Daemon is not online", "Code": 0, "Type": "error"})
        );
        server.stop().await;
    }

    #[tokio::test]
    async fn test_entry_page_served_with_html_content_type() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html>node</html>").unwrap();
        let server = start(&dir).await;

        let response = reqwest::get(server.entry_uri()).await.unwrap();

        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.headers()["content-type"], HTML_CONTENT_TYPE);
        assert_eq!(response.text().await.unwrap(), "<html>node</html>");
        server.stop().await;
    }

    #[tokio::test]
    async fn test_missing_bridge_script_is_404() {
        let dir = TempDir::new().unwrap();
        let server = start(&dir).await;

        let url = format!("{}/postmsg.bundle.js", server.address().http_url());
        let response = reqwest::get(&url).await.unwrap();

        assert_eq!(response.status().as_u16(), 404);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_preflight_is_answered_directly() {
        let dir = TempDir::new().unwrap();
        let server = start(&dir).await;

        let url = format!("{}/api/v0/id", server.address().http_url());
        let response = reqwest::Client::new()
            .request(reqwest::Method::OPTIONS, &url)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 204);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        server.stop().await;
    }

    #[tokio::test]
    async fn test_second_stop_is_logged_not_fatal() {
        let dir = TempDir::new().unwrap();
        let server = start(&dir).await;

        server.stop().await;
        server.stop().await;

        assert!(matches!(server.shutdown().await, Err(ServerError::NotRunning)));
    }

    #[tokio::test]
    async fn test_udp_address_cannot_be_bound() {
        let dir = TempDir::new().unwrap();
        let router = build_router(state(&dir), &NoRoutes);

        let result = ApiServer::new("/ip4/127.0.0.1/udp/0".parse().unwrap(), router)
            .start()
            .await;

        assert!(matches!(result, Err(StartupError::Bind { .. })));
    }
}
