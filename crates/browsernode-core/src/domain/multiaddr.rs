//! Multiaddress parsing and formatting for the API bind address.
//!
//! A multiaddress is a self-describing, slash-separated address:
//!
//! ```text
//! /ip4/127.0.0.1/tcp/5001
//! /ip6/::1/tcp/5001
//! /dns4/localhost/tcp/8080
//! ```
//!
//! Only the subset the host needs is supported: one network component
//! (`ip4`, `ip6`, `dns`, `dns4`, `dns6`) followed by one transport component
//! (`tcp`, `udp`).  Port `0` is allowed and means "ephemeral"; the real port
//! is only known after the server has bound.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use thiserror::Error;

/// Errors returned when parsing a multiaddress string.
#[derive(Debug, Error, PartialEq)]
pub enum MultiaddrError {
    /// The string does not start with `/`.
    #[error("multiaddress must start with '/': {0:?}")]
    MissingLeadingSlash(String),

    /// A protocol name is not supported.
    #[error("unsupported multiaddress protocol: {0}")]
    UnsupportedProtocol(String),

    /// A protocol is missing its value.
    #[error("multiaddress protocol `{0}` has no value")]
    MissingValue(String),

    /// The network component value is not a valid address.
    #[error("invalid {protocol} address: {value}")]
    InvalidHost { protocol: String, value: String },

    /// The port value is not a valid `u16`.
    #[error("invalid port: {0}")]
    InvalidPort(String),

    /// The address ends before a transport component.
    #[error("multiaddress has no transport component")]
    MissingTransport,

    /// Trailing components after the transport.
    #[error("unexpected trailing multiaddress component: {0}")]
    TrailingComponent(String),
}

/// DNS resolution family restriction for `dns*` hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsFamily {
    /// `/dns/…` – either family.
    Any,
    /// `/dns4/…` – IPv4 only.
    V4,
    /// `/dns6/…` – IPv6 only.
    V6,
}

/// The network component of a [`BindAddress`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Host {
    Ip(IpAddr),
    Dns { name: String, family: DnsFamily },
}

/// The transport component of a [`BindAddress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    fn as_str(self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
        }
    }
}

/// A structured network address: host, port, and transport.
///
/// Parsed from the node configuration before binding and rebuilt from the
/// listener's local address after binding, so the ephemeral port is filled
/// in.
///
/// # Example
///
/// ```rust
/// use browsernode_core::BindAddress;
///
/// let addr: BindAddress = "/ip4/127.0.0.1/tcp/5001".parse().unwrap();
/// assert_eq!(addr.port(), 5001);
/// assert_eq!(addr.http_url(), "http://127.0.0.1:5001");
/// assert_eq!(addr.to_string(), "/ip4/127.0.0.1/tcp/5001");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindAddress {
    host: Host,
    port: u16,
    transport: Transport,
}

impl BindAddress {
    /// Builds an address from its parts.
    pub fn new(host: Host, port: u16, transport: Transport) -> Self {
        Self {
            host,
            port,
            transport,
        }
    }

    /// Builds a TCP address from a bound socket address.
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self::new(Host::Ip(addr.ip()), addr.port(), Transport::Tcp)
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Returns the host as it would appear in a URL authority (IPv6 is not
    /// bracketed here; see [`BindAddress::http_url`]).
    pub fn host_str(&self) -> String {
        match &self.host {
            Host::Ip(ip) => ip.to_string(),
            Host::Dns { name, .. } => name.clone(),
        }
    }

    /// Formats the address as an `http://host:port` base URL.
    pub fn http_url(&self) -> String {
        match &self.host {
            Host::Ip(IpAddr::V6(ip)) => format!("http://[{ip}]:{}", self.port),
            _ => format!("http://{}:{}", self.host_str(), self.port),
        }
    }
}

impl fmt::Display for BindAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Host::Ip(IpAddr::V4(ip)) => write!(f, "/ip4/{ip}")?,
            Host::Ip(IpAddr::V6(ip)) => write!(f, "/ip6/{ip}")?,
            Host::Dns { name, family } => {
                let proto = match family {
                    DnsFamily::Any => "dns",
                    DnsFamily::V4 => "dns4",
                    DnsFamily::V6 => "dns6",
                };
                write!(f, "/{proto}/{name}")?;
            }
        }
        write!(f, "/{}/{}", self.transport.as_str(), self.port)
    }
}

impl FromStr for BindAddress {
    type Err = MultiaddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('/')
            .ok_or_else(|| MultiaddrError::MissingLeadingSlash(s.to_string()))?;

        let mut parts = rest.split('/');

        // ── Network component ─────────────────────────────────────────────────
        let proto = parts.next().unwrap_or_default();
        let value = parts
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| MultiaddrError::MissingValue(proto.to_string()))?;

        let invalid_host = || MultiaddrError::InvalidHost {
            protocol: proto.to_string(),
            value: value.to_string(),
        };

        let host = match proto {
            "ip4" => Host::Ip(IpAddr::V4(
                value.parse::<Ipv4Addr>().map_err(|_| invalid_host())?,
            )),
            "ip6" => Host::Ip(IpAddr::V6(
                value.parse::<Ipv6Addr>().map_err(|_| invalid_host())?,
            )),
            "dns" | "dns4" | "dns6" => Host::Dns {
                name: value.to_string(),
                family: match proto {
                    "dns4" => DnsFamily::V4,
                    "dns6" => DnsFamily::V6,
                    _ => DnsFamily::Any,
                },
            },
            other => return Err(MultiaddrError::UnsupportedProtocol(other.to_string())),
        };

        // ── Transport component ───────────────────────────────────────────────
        let transport = match parts.next() {
            Some("tcp") => Transport::Tcp,
            Some("udp") => Transport::Udp,
            Some(other) if !other.is_empty() => {
                return Err(MultiaddrError::UnsupportedProtocol(other.to_string()))
            }
            _ => return Err(MultiaddrError::MissingTransport),
        };

        let port_str = parts
            .next()
            .ok_or_else(|| MultiaddrError::MissingValue(transport.as_str().to_string()))?;
        let port = port_str
            .parse::<u16>()
            .map_err(|_| MultiaddrError::InvalidPort(port_str.to_string()))?;

        // A single trailing slash is tolerated; anything else is not.
        let trailing: Vec<&str> = parts.collect();
        match trailing.as_slice() {
            [] | [""] => {}
            [extra, ..] => return Err(MultiaddrError::TrailingComponent(extra.to_string())),
        }

        Ok(Self::new(host, port, transport))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ip4_tcp() {
        let addr: BindAddress = "/ip4/127.0.0.1/tcp/5001".parse().unwrap();
        assert_eq!(addr.host(), &Host::Ip("127.0.0.1".parse().unwrap()));
        assert_eq!(addr.port(), 5001);
        assert_eq!(addr.transport(), Transport::Tcp);
    }

    #[test]
    fn test_parse_ephemeral_port() {
        let addr: BindAddress = "/ip4/127.0.0.1/tcp/0".parse().unwrap();
        assert_eq!(addr.port(), 0);
    }

    #[test]
    fn test_parse_ip6_and_format_url_with_brackets() {
        let addr: BindAddress = "/ip6/::1/tcp/8080".parse().unwrap();
        assert_eq!(addr.http_url(), "http://[::1]:8080");
        assert_eq!(addr.to_string(), "/ip6/::1/tcp/8080");
    }

    #[test]
    fn test_parse_dns4_host() {
        let addr: BindAddress = "/dns4/localhost/tcp/8080".parse().unwrap();
        assert_eq!(addr.host_str(), "localhost");
        assert_eq!(addr.http_url(), "http://localhost:8080");
    }

    #[test]
    fn test_trailing_slash_is_tolerated() {
        let addr: BindAddress = "/ip4/10.0.0.1/tcp/4001/".parse().unwrap();
        assert_eq!(addr.port(), 4001);
    }

    #[test]
    fn test_display_matches_input() {
        for text in ["/ip4/0.0.0.0/tcp/5002", "/dns/example.org/udp/53", "/dns6/host/tcp/1"] {
            let addr: BindAddress = text.parse().unwrap();
            assert_eq!(addr.to_string(), text);
        }
    }

    #[test]
    fn test_from_socket_addr_fills_bound_port() {
        let bound: SocketAddr = "127.0.0.1:43123".parse().unwrap();
        let addr = BindAddress::from_socket_addr(bound);
        assert_eq!(addr.to_string(), "/ip4/127.0.0.1/tcp/43123");
        assert_eq!(addr.port(), 43123);
    }

    #[test]
    fn test_missing_leading_slash_is_error() {
        assert!(matches!(
            "ip4/127.0.0.1/tcp/1".parse::<BindAddress>(),
            Err(MultiaddrError::MissingLeadingSlash(_))
        ));
    }

    #[test]
    fn test_invalid_ip4_is_error() {
        assert!(matches!(
            "/ip4/999.1.1.1/tcp/1".parse::<BindAddress>(),
            Err(MultiaddrError::InvalidHost { .. })
        ));
    }

    #[test]
    fn test_missing_transport_is_error() {
        assert_eq!(
            "/ip4/127.0.0.1".parse::<BindAddress>(),
            Err(MultiaddrError::MissingTransport)
        );
    }

    #[test]
    fn test_invalid_port_is_error() {
        assert_eq!(
            "/ip4/127.0.0.1/tcp/70000".parse::<BindAddress>(),
            Err(MultiaddrError::InvalidPort("70000".to_string()))
        );
    }

    #[test]
    fn test_unsupported_protocol_is_error() {
        assert_eq!(
            "/unix/tmp/sock".parse::<BindAddress>(),
            Err(MultiaddrError::UnsupportedProtocol("unix".to_string()))
        );
    }

    #[test]
    fn test_trailing_component_is_error() {
        assert_eq!(
            "/ip4/127.0.0.1/tcp/80/http".parse::<BindAddress>(),
            Err(MultiaddrError::TrailingComponent("http".to_string()))
        );
    }
}
