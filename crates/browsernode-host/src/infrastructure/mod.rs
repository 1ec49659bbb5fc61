//! Infrastructure layer for browsernode-host.
//!
//! Contains the OS-facing adapters: the HTTP/WebSocket server, asset files
//! and the gateway client, the repository files, and the browser process.
//!
//! **Dependency rule**: this layer may depend on `application`, `domain` and
//! `browsernode_core`, but MUST NOT be imported by them.

pub mod address_file;
pub mod api_server;
pub mod assets;
pub mod browser;
pub mod repo_config;
pub mod routes;
