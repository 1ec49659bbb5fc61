//! Domain types with no I/O: addresses and configuration.

pub mod multiaddr;
pub mod node_config;

pub use multiaddr::{BindAddress, DnsFamily, Host, MultiaddrError, Transport};
pub use node_config::{ConfigError, NodeConfig};
