//! browsernode-host library entry point.
//!
//! Runs a storage node inside a headless browser and exposes it to local
//! callers as an HTTP API.  Re-exports all public modules so that
//! integration tests in `tests/` and the binary entry point in `main.rs`
//! share the same module tree.
//!
//! ```text
//! browsernode-host/src/
//! ├── domain/          HostConfig, BuildMode, startup state machine
//! ├── application/     channel, proxy client, handshake bridge
//! └── infrastructure/  axum server, assets, `api` file, browser supervisor
//! ```

pub mod application;
pub mod domain;
pub mod infrastructure;
