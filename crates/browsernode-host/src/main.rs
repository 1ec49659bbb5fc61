//! browsernode-host entry point.
//!
//! Serves a storage node that runs inside a headless browser.  The host binds
//! the node's API address, launches the browser at its own entry page, hands
//! the node its configuration over a WebSocket, and relays API traffic once
//! the node reports `READY`.
//!
//! # Usage
//!
//! ```text
//! browsernode-host [OPTIONS] <HASH> <VERSION> [GATEWAY]
//!
//! Arguments:
//!   <HASH>     Content hash of the node runtime bundle
//!   <VERSION>  Version of the node runtime bundle
//!   [GATEWAY]  Gateway multiaddress [default: /ip4/127.0.0.1/tcp/8080]
//!
//! Options:
//!   --repo <DIR>                Repository directory [default: .]
//!   --debug                     Debug mode
//!   --mode <MODE>               production | development [default: development]
//!   --browser <BIN>             Browser executable [default: google-chrome-stable]
//!   --dist-dir <DIR>            Override the asset directory
//!   --handshake-timeout <SECS>  Stop the browser if READY takes longer
//!   --relay-timeout <SECS>      Per-request relay timeout [default: 30]
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable           | Flag        |
//! |--------------------|-------------|
//! | `BROWSERNODE_REPO` | `--repo`    |
//! | `DEBUG`            | `--debug`   |
//! | `BUILD_MODE`       | `--mode`    |
//! | `BROWSER_BIN`      | `--browser` |
//!
//! # Startup
//!
//! ```text
//! parsing-args → resolving-gateway → loading-config → binding-server
//!   → write `api` file → launch browser → awaiting-handshake → ready
//!   → browser exits → stop server → remove `api` file → exit(code)
//! ```
//!
//! Any failure before the browser is launched is fatal: it is logged and the
//! process exits with code 1.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::builder::FalseyValueParser;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use browsernode_host::application::ProxyBridge;
use browsernode_host::domain::config::{DEFAULT_BROWSER, DEFAULT_GATEWAY};
use browsernode_host::domain::{BuildMode, HostConfig, StartupError, StartupStage};
use browsernode_host::infrastructure::address_file::AddressFile;
use browsernode_host::infrastructure::api_server::{build_router, ApiServer, ApiState};
use browsernode_host::infrastructure::assets::AssetResolver;
use browsernode_host::infrastructure::browser::{
    supervise, BrowserSupervisor, HostTeardown, Teardown,
};
use browsernode_host::infrastructure::repo_config::load_node_config;
use browsernode_host::infrastructure::routes::RelayRoutes;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Browser-hosted storage node host.
#[derive(Debug, Parser)]
#[command(
    name = "browsernode-host",
    about = "Serves a browser-hosted storage node as a local HTTP API",
    version
)]
struct Cli {
    /// Content hash of the node runtime bundle.
    #[arg(value_name = "HASH")]
    node_hash: Option<String>,

    /// Version of the node runtime bundle.
    #[arg(value_name = "VERSION")]
    node_version: Option<String>,

    /// Gateway the node runtime is fetched from when it is not on disk.
    #[arg(value_name = "GATEWAY", default_value = DEFAULT_GATEWAY)]
    gateway: String,

    /// Repository directory holding `config`; the `api` file and the browser
    /// profile are written here too.
    #[arg(long, default_value = ".", env = "BROWSERNODE_REPO")]
    repo: PathBuf,

    /// Debug mode: visible browser, request logging, and more than one
    /// sandbox connection allowed.  Any non-empty value other than a falsey
    /// one (`0`, `false`, `no`, `off`) enables it.
    #[arg(long, env = "DEBUG", value_parser = FalseyValueParser::new())]
    debug: bool,

    /// Where the bridge script and entry page are read from.
    #[arg(long = "mode", default_value = "development", env = "BUILD_MODE")]
    build_mode: BuildMode,

    /// Browser executable to launch.
    #[arg(long, default_value = DEFAULT_BROWSER, env = "BROWSER_BIN")]
    browser: String,

    /// Asset directory; overrides the one selected by `--mode`.
    #[arg(long)]
    dist_dir: Option<PathBuf>,

    /// Seconds to wait for the sandbox handshake before stopping the
    /// browser.  Waits forever when absent.
    #[arg(long, value_name = "SECS")]
    handshake_timeout: Option<u64>,

    /// Seconds a relayed API request waits for the node's answer.
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    relay_timeout: u64,
}

impl Cli {
    /// Converts the parsed CLI arguments into a [`HostConfig`].
    ///
    /// `exe_dir` is the directory of the running executable, used by the
    /// production build mode.
    ///
    /// # Errors
    ///
    /// - [`StartupError::MissingArgument`] if the hash or version is absent.
    /// - [`StartupError::InvalidGateway`] if the gateway does not parse.
    fn into_host_config(self, exe_dir: Option<&Path>) -> Result<HostConfig, StartupError> {
        let node_hash = self
            .node_hash
            .filter(|h| !h.is_empty())
            .ok_or(StartupError::MissingArgument("hash"))?;
        let node_version = self
            .node_version
            .filter(|v| !v.is_empty())
            .ok_or(StartupError::MissingArgument("version"))?;
        let gateway = self
            .gateway
            .parse()
            .map_err(StartupError::InvalidGateway)?;

        let dist_dir = self
            .dist_dir
            .unwrap_or_else(|| self.build_mode.default_dist_dir(exe_dir));

        Ok(HostConfig {
            repo_dir: self.repo,
            node_hash,
            node_version,
            gateway,
            debug: self.debug,
            dist_dir,
            browser_bin: self.browser,
            handshake_timeout: self.handshake_timeout.map(Duration::from_secs),
            relay_timeout: Duration::from_secs(self.relay_timeout),
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// Runs on a current-thread runtime: every handler runs to completion on one
/// loop, so a connection's `SETUP` is always queued before its first inbound
/// frame is handled.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            match e.downcast_ref::<StartupError>() {
                Some(startup) => error!(stage = %startup.stage(), "{e:#}"),
                None => error!("{e:#}"),
            }
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    info!(stage = %StartupStage::ParsingArgs, "browsernode-host starting");
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    let config = cli.into_host_config(exe_dir.as_deref())?;

    info!(stage = %StartupStage::ResolvingGateway, gateway = %config.gateway_url());
    let assets = Arc::new(AssetResolver::new(&config).context("failed to set up asset resolver")?);

    info!(stage = %StartupStage::LoadingConfig, repo = %config.repo_dir.display());
    let node_config = Arc::new(load_node_config(&config.repo_dir).await?);

    info!(stage = %StartupStage::BindingServer, api = %node_config.api_address());
    let bridge = Arc::new(ProxyBridge::new(Arc::clone(&node_config), config.debug));
    let state = ApiState {
        bridge: Arc::clone(&bridge),
        assets,
        node_hash: Arc::from(config.node_hash.as_str()),
        node_version: Arc::from(config.node_version.as_str()),
        debug: config.debug,
    };
    let router = build_router(state, &RelayRoutes::new(config.relay_timeout));
    let server = Arc::new(
        ApiServer::new(node_config.api_address().clone(), router)
            .start()
            .await?,
    );

    let address_file = AddressFile::in_dir(&config.repo_dir);
    let teardown = HostTeardown::new(Arc::clone(&server), address_file.clone());

    if let Err(e) = address_file.write(server.address()).await {
        teardown.stop_api_server().await;
        return Err(e).with_context(|| {
            format!("failed to write {}", address_file.path().display())
        });
    }

    let browser = match BrowserSupervisor::new(&config).spawn(&server.entry_uri()) {
        Ok(handle) => handle,
        Err(e) => {
            teardown.stop_api_server().await;
            teardown.remove_address_file().await;
            return Err(e.into());
        }
    };

    info!(stage = %StartupStage::AwaitingHandshake, uri = %server.entry_uri());
    let ready = async move { bridge.wait_online().await };
    let code = supervise(browser, &teardown, ready, config.handshake_timeout).await;

    info!(stage = %StartupStage::Exiting, code, "browsernode-host stopped");
    Ok(code)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
