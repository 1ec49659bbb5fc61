//! The linear startup state machine and its fatal errors.
//!
//! ```text
//! ParsingArgs → ResolvingGateway → LoadingConfig → BindingServer
//!             → AwaitingHandshake → Ready → (Exiting | Crashed)
//! ```
//!
//! Every stage before `AwaitingHandshake` can fail fatally.  A fatal error is
//! logged and the process exits non-zero without retrying.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use browsernode_core::{ConfigError, MultiaddrError};

/// One stage of host startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StartupStage {
    ParsingArgs,
    ResolvingGateway,
    LoadingConfig,
    BindingServer,
    AwaitingHandshake,
    Ready,
    Exiting,
    Crashed,
}

impl fmt::Display for StartupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StartupStage::ParsingArgs => "parsing-args",
            StartupStage::ResolvingGateway => "resolving-gateway",
            StartupStage::LoadingConfig => "loading-config",
            StartupStage::BindingServer => "binding-server",
            StartupStage::AwaitingHandshake => "awaiting-handshake",
            StartupStage::Ready => "ready",
            StartupStage::Exiting => "exiting",
            StartupStage::Crashed => "crashed",
        };
        f.write_str(name)
    }
}

/// Fatal startup failures.
#[derive(Debug, Error)]
pub enum StartupError {
    /// A required positional argument is absent.
    #[error("Not enough information to serve the node runtime, missing {0}")]
    MissingArgument(&'static str),

    /// The gateway multiaddress does not parse.
    #[error("invalid gateway address: {0}")]
    InvalidGateway(#[source] MultiaddrError),

    /// The repository config file cannot be read.
    #[error("No repository found in {}", .path.display())]
    ConfigUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The repository config file is not a usable config.
    #[error(transparent)]
    ConfigInvalid(#[from] ConfigError),

    /// The API address cannot be bound.
    #[error("failed to bind API server on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

impl StartupError {
    /// The stage this error aborts.
    pub fn stage(&self) -> StartupStage {
        match self {
            StartupError::MissingArgument(_) => StartupStage::ParsingArgs,
            StartupError::InvalidGateway(_) => StartupStage::ResolvingGateway,
            StartupError::ConfigUnreadable { .. } | StartupError::ConfigInvalid(_) => {
                StartupStage::LoadingConfig
            }
            StartupError::Bind { .. } => StartupStage::BindingServer,
        }
    }
}
