//! Host configuration types.
//!
//! [`HostConfig`] is the single source of truth for all runtime settings of
//! the host process.  `main.rs` builds it from CLI arguments and environment
//! variables; tests build it directly.  Nothing below the entry point reads
//! the environment.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use browsernode_core::BindAddress;

/// Browser binary launched when none is configured.
pub const DEFAULT_BROWSER: &str = "google-chrome-stable";

/// Gateway used for the node runtime fallback when none is given.
pub const DEFAULT_GATEWAY: &str = "/ip4/127.0.0.1/tcp/8080";

/// How long a relayed API request waits for the sandbox's answer.
pub const DEFAULT_RELAY_TIMEOUT: Duration = Duration::from_secs(30);

/// Selects where the bridge script and entry page are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// Assets ship next to the executable in `dist/`.
    Production,
    /// Assets come from the source tree's `../dist`.
    #[default]
    Development,
}

impl BuildMode {
    /// Returns the dist directory this mode reads assets from.
    ///
    /// `exe_dir` is the directory containing the running executable, when
    /// known.
    pub fn default_dist_dir(self, exe_dir: Option<&Path>) -> PathBuf {
        match self {
            BuildMode::Production => exe_dir
                .map(|dir| dir.join("dist"))
                .unwrap_or_else(|| PathBuf::from("dist")),
            BuildMode::Development => PathBuf::from("../dist"),
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BuildMode::Production => "production",
            BuildMode::Development => "development",
        })
    }
}

impl FromStr for BuildMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(BuildMode::Production),
            "development" | "dev" | "" => Ok(BuildMode::Development),
            other => Err(format!(
                "unknown build mode '{other}' (expected 'production' or 'development')"
            )),
        }
    }
}

/// All runtime configuration for the host process.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Repository directory: holds `config`, the `api` file, the browser's
    /// `data/` profile, and locally cached node runtimes.
    pub repo_dir: PathBuf,

    /// Content hash of the node runtime bundle.
    pub node_hash: String,

    /// Version of the node runtime bundle.
    pub node_version: String,

    /// Gateway used when the node runtime is not available locally.
    pub gateway: BindAddress,

    /// Debug mode: relaxes the single-connection rule, logs every request,
    /// and launches the browser with a visible window.
    pub debug: bool,

    /// Directory holding `postmsg.bundle.js` and `index.html`.
    pub dist_dir: PathBuf,

    /// Browser executable.
    pub browser_bin: String,

    /// Optional limit on the wait for `READY`.  `None` waits forever.
    pub handshake_timeout: Option<Duration>,

    /// How long a relayed API request waits for the sandbox's answer.
    pub relay_timeout: Duration,
}

impl HostConfig {
    /// Base URL of the gateway, e.g. `http://127.0.0.1:8080`.
    pub fn gateway_url(&self) -> String {
        self.gateway.http_url()
    }

    /// Browser profile directory, scoped to the repository.
    pub fn user_data_dir(&self) -> PathBuf {
        self.repo_dir.join("data")
    }
}

impl Default for HostConfig {
    /// Returns a `HostConfig` suitable for tests and local development.
    ///
    /// | Field             | Default                   |
    /// |-------------------|---------------------------|
    /// | repo_dir          | `.`                       |
    /// | gateway           | `/ip4/127.0.0.1/tcp/8080` |
    /// | debug             | `false`                   |
    /// | dist_dir          | `../dist`                 |
    /// | browser_bin       | `google-chrome-stable`    |
    /// | handshake_timeout | none                      |
    /// | relay_timeout     | 30 seconds                |
    fn default() -> Self {
        Self {
            repo_dir: PathBuf::from("."),
            node_hash: String::new(),
            node_version: String::new(),
            gateway: BindAddress::from_socket_addr(([127, 0, 0, 1], 8080).into()),
            debug: false,
            dist_dir: BuildMode::Development.default_dist_dir(None),
            browser_bin: DEFAULT_BROWSER.to_string(),
            handshake_timeout: None,
            relay_timeout: DEFAULT_RELAY_TIMEOUT,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
