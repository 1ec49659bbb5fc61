//! End-to-end tests: a real API server, a simulated sandbox on the WebSocket
//! channel, and real child processes standing in for the browser.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use browsernode_core::{decode_frame, encode_frame, BindAddress, ControlKind, ProxyMessage};
use browsernode_host::application::ProxyBridge;
use browsernode_host::domain::HostConfig;
use browsernode_host::infrastructure::address_file::AddressFile;
use browsernode_host::infrastructure::api_server::{build_router, ApiServer, ApiState, RunningServer};
use browsernode_host::infrastructure::assets::AssetResolver;
use browsernode_host::infrastructure::repo_config::{load_node_config, CONFIG_FILE_NAME};
use browsernode_host::infrastructure::routes::RelayRoutes;

type Sandbox = WebSocketStream<MaybeTlsStream<TcpStream>>;

const REPO_CONFIG: &str = r#"{"Addresses":{"API":"/ip4/127.0.0.1/tcp/0"},"Identity":{"PeerID":"QmPeer"}}"#;

// ── Harness ───────────────────────────────────────────────────────────────────

struct Host {
    bridge: Arc<ProxyBridge>,
    server: Arc<RunningServer>,
    address_file: AddressFile,
}

async fn start_host(repo: &Path, config: HostConfig) -> Host {
    std::fs::write(repo.join(CONFIG_FILE_NAME), REPO_CONFIG).unwrap();
    let node_config = Arc::new(load_node_config(repo).await.unwrap());

    let bridge = Arc::new(ProxyBridge::new(Arc::clone(&node_config), config.debug));
    let state = ApiState {
        bridge: Arc::clone(&bridge),
        assets: Arc::new(AssetResolver::new(&config).unwrap()),
        node_hash: Arc::from(config.node_hash.as_str()),
        node_version: Arc::from(config.node_version.as_str()),
        debug: config.debug,
    };
    let router = build_router(state, &RelayRoutes::new(Duration::from_secs(5)));
    let server = ApiServer::new(node_config.api_address().clone(), router)
        .start()
        .await
        .unwrap();

    let address_file = AddressFile::in_dir(repo);
    address_file.write(server.address()).await.unwrap();

    Host {
        bridge,
        server: Arc::new(server),
        address_file,
    }
}

fn host_config(repo: &Path) -> HostConfig {
    HostConfig {
        repo_dir: repo.to_path_buf(),
        dist_dir: repo.to_path_buf(),
        node_hash: "QmHash".to_string(),
        node_version: "1.0.0".to_string(),
        ..HostConfig::default()
    }
}

fn ws_uri(server: &RunningServer) -> String {
    format!("ws://127.0.0.1:{}/", server.address().port())
}

async fn next_text(sandbox: &mut Sandbox) -> String {
    let frame = tokio::time::timeout(Duration::from_secs(5), sandbox.next())
        .await
        .expect("sandbox frame timed out")
        .expect("channel ended")
        .expect("channel error");
    match frame {
        Message::Text(text) => text,
        other => panic!("expected a text frame, got {other:?}"),
    }
}

/// Answers every relay request with a fixed version body.
async fn answer_requests(mut sandbox: Sandbox) {
    while let Some(Ok(Message::Text(text))) = sandbox.next().await {
        let request: Value = serde_json::from_str(&text).unwrap();
        let reply = json!({
            "id": request["id"],
            "status": 200,
            "headers": {"Content-Type": "application/json"},
            "body": BASE64_STANDARD.encode(format!(r#"{{"Version":"0.1.0","Path":"{}"}}"#, request["path"].as_str().unwrap_or("")).as_bytes()),
        });
        if sandbox.send(Message::Text(reply.to_string())).await.is_err() {
            break;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "current_thread")]
async fn test_handshake_then_relay_through_sandbox() {
    // Arrange
    let repo = TempDir::new().unwrap();
    let host = start_host(repo.path(), host_config(repo.path())).await;
    let http = reqwest::Client::new();
    let version_url = format!("{}/api/v0/version", host.server.address().http_url());

    // Act / Assert: the api file names the bound address
    let written: BindAddress = host.address_file.read().await.unwrap().parse().unwrap();
    assert_eq!(&written, host.server.address());

    // Act / Assert: API is refused before the handshake
    let refused = http.get(&version_url).send().await.unwrap();
    assert_eq!(refused.status(), 500);
    let body: Value = serde_json::from_str(&refused.text().await.unwrap()).unwrap();
    assert_eq!(body["Message"], "Daemon is not online");

    // Act / Assert: SETUP is the first frame and carries the repo config
    let (mut sandbox, _) = connect_async(ws_uri(&host.server)).await.unwrap();
    let setup = decode_frame(&next_text(&mut sandbox).await).unwrap();
    match setup {
        ProxyMessage::Control { kind, payload } => {
            assert_eq!(kind, ControlKind::Setup);
            assert_eq!(payload["Identity"]["PeerID"], "QmPeer");
        }
        other => panic!("expected SETUP, got {other:?}"),
    }

    sandbox
        .send(Message::Text(encode_frame(&ProxyMessage::ready())))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), host.bridge.wait_online())
        .await
        .expect("READY was not processed");
    let responder = tokio::spawn(answer_requests(sandbox));

    // Act / Assert: API requests are answered by the sandbox
    let answered = http.get(&version_url).send().await.unwrap();
    assert_eq!(answered.status(), 200);
    assert_eq!(answered.headers()["access-control-allow-origin"], "*");
    let body: Value = serde_json::from_str(&answered.text().await.unwrap()).unwrap();
    assert_eq!(body["Version"], "0.1.0");
    assert_eq!(body["Path"], "/api/v0/version");

    // Act / Assert: the bare prefix reaches the route table too
    let root_url = format!("{}/api/", host.server.address().http_url());
    let root = http.get(&root_url).send().await.unwrap();
    assert_eq!(root.status(), 200);
    let body: Value = serde_json::from_str(&root.text().await.unwrap()).unwrap();
    assert_eq!(body["Path"], "/api/");

    // Act / Assert: a second sandbox is refused while the first is live
    let (mut intruder, _) = connect_async(ws_uri(&host.server)).await.unwrap();
    let refusal = tokio::time::timeout(Duration::from_secs(5), intruder.next())
        .await
        .expect("no answer to second connection");
    match refusal {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(frame.code, CloseCode::Policy),
        other => panic!("expected a policy Close, got {other:?}"),
    }

    // Act / Assert: the first sandbox still holds the slot and answers
    assert!(host.bridge.is_occupied());
    let again = http.get(&version_url).send().await.unwrap();
    assert_eq!(again.status(), 200);
    let body: Value = serde_json::from_str(&again.text().await.unwrap()).unwrap();
    assert_eq!(body["Version"], "0.1.0");
    assert!(host.bridge.is_occupied());

    responder.abort();
    host.server.stop().await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_debug_mode_accepts_second_sandbox() {
    let repo = TempDir::new().unwrap();
    let config = HostConfig {
        debug: true,
        ..host_config(repo.path())
    };
    let host = start_host(repo.path(), config).await;

    let (mut first, _) = connect_async(ws_uri(&host.server)).await.unwrap();
    let (mut second, _) = connect_async(ws_uri(&host.server)).await.unwrap();

    assert!(matches!(decode_frame(&next_text(&mut first).await), Ok(ProxyMessage::Control { kind: ControlKind::Setup, .. })));
    assert!(matches!(decode_frame(&next_text(&mut second).await), Ok(ProxyMessage::Control { kind: ControlKind::Setup, .. })));

    host.server.stop().await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_sandbox_disconnect_fails_pending_request() {
    // Arrange
    let repo = TempDir::new().unwrap();
    let host = start_host(repo.path(), host_config(repo.path())).await;
    let (mut sandbox, _) = connect_async(ws_uri(&host.server)).await.unwrap();
    next_text(&mut sandbox).await;
    sandbox
        .send(Message::Text(encode_frame(&ProxyMessage::ready())))
        .await
        .unwrap();
    host.bridge.wait_online().await;

    // Act: the sandbox drops the connection on the first request it sees
    let hangup = tokio::spawn(async move {
        let _ = sandbox.next().await;
        drop(sandbox);
    });
    let response = reqwest::get(format!("{}/api/v0/id", host.server.address().http_url()))
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), 502);
    hangup.await.unwrap();
    host.server.stop().await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_node_runtime_falls_back_to_gateway() {
    // Arrange: a gateway that serves exactly one runtime bundle
    let gateway = Router::new().route(
        "/ipfs/QmHash/1.0.0/dist/index.js",
        get(|| async { "console.log('node runtime')" }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let gateway_addr = listener.local_addr().unwrap();
    let gateway_task = tokio::spawn(async move { axum::serve(listener, gateway).await });

    let repo = TempDir::new().unwrap();
    let config = HostConfig {
        gateway: BindAddress::from_socket_addr(gateway_addr),
        ..host_config(repo.path())
    };
    let host = start_host(repo.path(), config).await;

    // Act
    let response = reqwest::get(format!("{}/ipfs.js", host.server.address().http_url()))
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "console.log('node runtime')");

    host.server.stop().await;
    gateway_task.abort();
}

#[tokio::test(flavor = "current_thread")]
async fn test_local_node_runtime_preferred_over_gateway() {
    let repo = TempDir::new().unwrap();
    let bundle_dir = repo.path().join("QmHash/1.0.0/dist");
    std::fs::create_dir_all(&bundle_dir).unwrap();
    std::fs::write(bundle_dir.join("index.js"), "local runtime").unwrap();
    let host = start_host(repo.path(), host_config(repo.path())).await;

    let response = reqwest::get(format!("{}/ipfs.js", host.server.address().http_url()))
        .await
        .unwrap();

    assert_eq!(response.text().await.unwrap(), "local runtime");
    host.server.stop().await;
}

#[cfg(unix)]
#[tokio::test(flavor = "current_thread")]
async fn test_browser_exit_tears_down_host() {
    use browsernode_host::infrastructure::browser::{supervise, BrowserProcessHandle, HostTeardown};

    // Arrange
    let repo = TempDir::new().unwrap();
    let host = start_host(repo.path(), host_config(repo.path())).await;
    let url = format!("{}/", host.server.address().http_url());
    let teardown = HostTeardown::new(Arc::clone(&host.server), host.address_file.clone());

    let mut command = tokio::process::Command::new("sh");
    command.args(["-c", "exit 0"]);
    let browser = BrowserProcessHandle::spawn(command).unwrap();

    // Act
    let code = supervise(browser, &teardown, std::future::pending::<()>(), None).await;

    // Assert
    assert_eq!(code, 0);
    assert!(!host.address_file.path().exists(), "api file must be removed");
    assert!(reqwest::get(&url).await.is_err(), "server must be stopped");
}
