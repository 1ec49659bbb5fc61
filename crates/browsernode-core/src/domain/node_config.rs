//! The repository configuration consumed by the host.
//!
//! The repository `config` file is a large JSON document owned by the node.
//! The host only reads `Addresses.API`; the full document is kept verbatim
//! because it is handed to the sandbox in the `SETUP` envelope.
//!
//! ```json
//! {
//!   "Identity": { "PeerID": "Qm..." },
//!   "Addresses": { "API": "/ip4/127.0.0.1/tcp/5001", "Swarm": [] }
//! }
//! ```

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::domain::multiaddr::{BindAddress, MultiaddrError};

/// Errors produced while interpreting a config document.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// The text is not valid JSON.
    #[error("Could not parse config {0}")]
    Parse(String),

    /// `Addresses.API` is absent or not a string.
    #[error("config has no Addresses.API entry")]
    MissingApiAddress,

    /// `Addresses.API` is present but not a valid multiaddress.
    #[error("config Addresses.API is invalid: {0}")]
    InvalidApiAddress(#[from] MultiaddrError),
}

// Typed view over the fields the host reads.  Everything else is ignored.
#[derive(Debug, Deserialize)]
struct ConfigView {
    #[serde(rename = "Addresses")]
    addresses: Option<AddressesView>,
}

#[derive(Debug, Deserialize)]
struct AddressesView {
    #[serde(rename = "API")]
    api: Option<Value>,
}

/// Parsed, immutable node configuration.
///
/// Created once at startup and shared behind an `Arc` for the lifetime of
/// the process.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    raw: Value,
    api: BindAddress,
}

impl NodeConfig {
    /// Parses a config document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the text is not JSON or lacks a valid
    /// `Addresses.API` multiaddress.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let raw: Value = serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_value(raw)
    }

    /// Interprets an already-parsed document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `Addresses.API` is missing or invalid.
    pub fn from_value(raw: Value) -> Result<Self, ConfigError> {
        let view: ConfigView =
            serde_json::from_value(raw.clone()).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let api_str = view
            .addresses
            .and_then(|a| a.api)
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or(ConfigError::MissingApiAddress)?;

        let api = api_str.parse::<BindAddress>()?;

        Ok(Self { raw, api })
    }

    /// The full config document, as sent in `SETUP`.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// The configured API address (port may be `0`).
    pub fn api_address(&self) -> &BindAddress {
        &self.api
    }
}
