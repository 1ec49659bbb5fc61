//! AssetResolver: locates the files the host serves to the sandbox.
//!
//! Three assets are dynamic:
//!
//! | Route                | Source                                         |
//! |----------------------|------------------------------------------------|
//! | `/`                  | `{dist}/index.html`                            |
//! | `/postmsg.bundle.js` | `{dist}/postmsg.bundle.js`                     |
//! | `/ipfs.js`           | `{repo}/{hash}/{version}/dist/index[.min].js`, |
//! |                      | else `{gateway}/ipfs/{same path}`              |
//!
//! Every asset is returned as an [`AssetStream`] so the HTTP layer never
//! buffers a whole file.  The node runtime falls back to the gateway on any
//! local failure; the gateway response body is piped through chunk by chunk.
//! A failed gateway fetch is not retried: it becomes an error item in the
//! stream and the HTTP response body is aborted.

use std::io;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream};
use futures_util::{StreamExt, TryStreamExt};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::domain::config::HostConfig;

/// File name of the bridge script inside the dist directory.
pub const BRIDGE_SCRIPT: &str = "postmsg.bundle.js";

/// File name of the entry page inside the dist directory.
pub const ENTRY_PAGE: &str = "index.html";

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
pub const JS_CONTENT_TYPE: &str = "application/javascript";

const CHUNK_SIZE: usize = 64 * 1024;

/// Errors surfaced while producing an asset.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("gateway request {url} failed: {source}")]
    Gateway {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("gateway returned status {status} for {url}")]
    GatewayStatus { url: String, status: u16 },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// A streaming byte source for one asset.
pub type AssetStream = BoxStream<'static, Result<Bytes, AssetError>>;

/// Resolves the bridge script, entry page and node runtime.
#[derive(Debug, Clone)]
pub struct AssetResolver {
    client: reqwest::Client,
    dist_dir: PathBuf,
    runtime_root: PathBuf,
    gateway_url: String,
    debug: bool,
}

impl AssetResolver {
    /// Builds a resolver from the host configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AssetError::Client`] if the HTTP client cannot be built
    /// (e.g. the TLS backend fails to initialise).
    pub fn new(config: &HostConfig) -> Result<Self, AssetError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(AssetError::Client)?;
        Ok(Self {
            client,
            dist_dir: config.dist_dir.clone(),
            runtime_root: config.repo_dir.clone(),
            gateway_url: config.gateway_url(),
            debug: config.debug,
        })
    }

    /// Streams `postmsg.bundle.js` from the dist directory.
    pub async fn resolve_bridge_script(&self) -> Result<AssetStream, AssetError> {
        open_local(&self.dist_dir.join(BRIDGE_SCRIPT)).await
    }

    /// Streams `index.html` from the dist directory.
    pub async fn resolve_entry_page(&self) -> Result<AssetStream, AssetError> {
        open_local(&self.dist_dir.join(ENTRY_PAGE)).await
    }

    /// Streams the node runtime bundle, locally if present, else from the
    /// gateway.
    ///
    /// Never fails up front: gateway failures arrive as stream errors.
    pub async fn resolve_node_runtime(&self, hash: &str, version: &str) -> AssetStream {
        let relative = self.node_runtime_path(hash, version);
        let local = self.runtime_root.join(&relative);

        match open_local(&local).await {
            Ok(stream) => {
                debug!(path = %local.display(), "serving node runtime from disk");
                stream
            }
            Err(e) => {
                let url = format!("{}/ipfs/{relative}", self.gateway_url);
                info!("{e}; fetching node runtime from {url}");
                gateway_stream(self.client.clone(), url)
            }
        }
    }

    /// The runtime bundle path relative to the repository and the gateway's
    /// `/ipfs/` root.
    pub fn node_runtime_path(&self, hash: &str, version: &str) -> String {
        let suffix = if self.debug { ".min" } else { "" };
        format!("{hash}/{version}/dist/index{suffix}.js")
    }
}

async fn open_local(path: &Path) -> Result<AssetStream, AssetError> {
    let file = File::open(path).await.map_err(|source| AssetError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(file_stream(file, path.to_path_buf()))
}

fn file_stream(file: File, path: PathBuf) -> AssetStream {
    stream::try_unfold((file, path), |(mut file, path)| async move {
        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        let n = file.read_buf(&mut buf).await.map_err(|source| AssetError::Read {
            path: path.clone(),
            source,
        })?;
        if n == 0 {
            Ok(None)
        } else {
            Ok(Some((buf.freeze(), (file, path))))
        }
    })
    .boxed()
}

fn gateway_stream(client: reqwest::Client, url: String) -> AssetStream {
    let fetch = async move {
        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|source| AssetError::Gateway {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AssetError::GatewayStatus {
                url,
                status: status.as_u16(),
            });
        }

        Ok(response
            .bytes_stream()
            .map_err(move |source| AssetError::Gateway {
                url: url.clone(),
                source,
            }))
    };

    stream::once(fetch).try_flatten().boxed()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn collect(stream: AssetStream) -> Result<Vec<u8>, AssetError> {
        let chunks: Vec<Bytes> = stream.try_collect().await?;
        Ok(chunks.concat())
    }

    fn resolver(dir: &TempDir, debug: bool) -> AssetResolver {
        let config = HostConfig {
            repo_dir: dir.path().to_path_buf(),
            dist_dir: dir.path().join("dist"),
            debug,
            // Nothing listens on port 9: any gateway fetch fails fast.
            gateway: "/ip4/127.0.0.1/tcp/9".parse().unwrap(),
            ..HostConfig::default()
        };
        AssetResolver::new(&config).unwrap()
    }

    #[test]
    fn test_runtime_path_uses_min_suffix_in_debug() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            resolver(&dir, true).node_runtime_path("QmHash", "0.1.0"),
            "QmHash/0.1.0/dist/index.min.js"
        );
        assert_eq!(
            resolver(&dir, false).node_runtime_path("QmHash", "0.1.0"),
            "QmHash/0.1.0/dist/index.js"
        );
    }

    #[tokio::test]
    async fn test_entry_page_streams_file_contents() {
        // Arrange
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("dist")).unwrap();
        std::fs::write(dir.path().join("dist").join(ENTRY_PAGE), "<html></html>").unwrap();

        // Act
        let bytes = collect(resolver(&dir, false).resolve_entry_page().await.unwrap())
            .await
            .unwrap();

        // Assert
        assert_eq!(bytes, b"<html></html>");
    }

    #[tokio::test]
    async fn test_missing_bridge_script_is_read_error() {
        let dir = TempDir::new().unwrap();
        let err = resolver(&dir, false).resolve_bridge_script().await.err().unwrap();
        assert!(matches!(err, AssetError::Read { .. }));
    }

    #[tokio::test]
    async fn test_large_local_runtime_streams_in_chunks() {
        // Arrange
        let dir = TempDir::new().unwrap();
        let runtime_dir = dir.path().join("QmHash/1.0.0/dist");
        std::fs::create_dir_all(&runtime_dir).unwrap();
        let payload: Vec<u8> = (0..CHUNK_SIZE * 2 + 17).map(|i| (i % 251) as u8).collect();
        std::fs::write(runtime_dir.join("index.js"), &payload).unwrap();

        // Act
        let stream = resolver(&dir, false)
            .resolve_node_runtime("QmHash", "1.0.0")
            .await;
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();

        // Assert
        assert!(chunks.len() >= 3);
        assert_eq!(chunks.concat(), payload);
    }

    #[tokio::test]
    async fn test_unreachable_gateway_surfaces_as_stream_error() {
        let dir = TempDir::new().unwrap();

        let stream = resolver(&dir, false)
            .resolve_node_runtime("QmMissing", "1.0.0")
            .await;
        let result = collect(stream).await;

        assert!(matches!(result, Err(AssetError::Gateway { .. })));
    }
}
