//! Loads the node configuration from the repository's `config` file.

use std::path::Path;

use browsernode_core::NodeConfig;
use tracing::debug;

use crate::domain::startup::StartupError;

/// Name of the config file inside the repository directory.
pub const CONFIG_FILE_NAME: &str = "config";

/// Reads and parses `{repo_dir}/config`.
///
/// # Errors
///
/// - [`StartupError::ConfigUnreadable`] if the file cannot be read.
/// - [`StartupError::ConfigInvalid`] if it is not JSON or lacks a valid
///   `Addresses.API`.
pub async fn load_node_config(repo_dir: &Path) -> Result<NodeConfig, StartupError> {
    let path = repo_dir.join(CONFIG_FILE_NAME);
    let text = tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| StartupError::ConfigUnreadable {
            path: repo_dir.to_path_buf(),
            source,
        })?;

    let config = NodeConfig::from_json(&text)?;
    debug!(path = %path.display(), api = %config.api_address(), "node config loaded");
    Ok(config)
}
