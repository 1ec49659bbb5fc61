//! Domain layer for browsernode-host.
//!
//! Pure types with no I/O: the host configuration and the startup state
//! machine.  No `tokio`, sockets, or environment reads belong here.

pub mod config;
pub mod startup;

pub use config::{BuildMode, HostConfig};
pub use startup::{StartupError, StartupStage};
