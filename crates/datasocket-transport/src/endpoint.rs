use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};

use crate::error::{Result, TransportError};

/// Host used when the caller passes an empty host string: all IPv4 interfaces.
const ANY_HOST: &str = "0.0.0.0";

/// A `(host, port)` pair resolved to a concrete socket address.
///
/// Resolution happens once, when the endpoint is built, so a bad host name
/// is reported as a configuration error before any background loop starts.
/// When a name resolves to several addresses, IPv4 is preferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
    addr: SocketAddr,
}

impl Endpoint {
    /// Resolve `host:port`. An empty host means "all interfaces".
    pub fn resolve(host: &str, port: u16) -> Result<Self> {
        let host = if host.trim().is_empty() {
            ANY_HOST
        } else {
            host.trim()
        };

        let candidates: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|err| TransportError::InvalidAddress {
                addr: format!("{host}:{port}"),
                reason: err.to_string(),
            })?
            .collect();

        let addr = candidates
            .iter()
            .copied()
            .find(SocketAddr::is_ipv4)
            .or_else(|| candidates.first().copied())
            .ok_or_else(|| TransportError::InvalidAddress {
                addr: format!("{host}:{port}"),
                reason: "host resolved to no addresses".to_string(),
            })?;

        Ok(Self {
            host: host.to_string(),
            port,
            addr,
        })
    }

    /// Wrap an already-resolved socket address.
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
            addr,
        }
    }

    /// The resolved socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Host as configured (after empty-host substitution).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port as configured.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// An ephemeral local address of the same family, for sockets that
    /// only send.
    pub fn unspecified_local(&self) -> SocketAddr {
        let ip = match self.addr.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        SocketAddr::new(ip, 0)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_ipv4_literal() {
        let endpoint = Endpoint::resolve("127.0.0.1", 4001).unwrap();
        assert_eq!(endpoint.addr(), "127.0.0.1:4001".parse().unwrap());
        assert_eq!(endpoint.to_string(), "127.0.0.1:4001");
    }

    #[test]
    fn localhost_prefers_ipv4() {
        let endpoint = Endpoint::resolve("localhost", 4001).unwrap();
        assert!(endpoint.addr().ip().is_loopback());
        assert_eq!(endpoint.port(), 4001);
    }

    #[test]
    fn empty_host_binds_all_interfaces() {
        let endpoint = Endpoint::resolve("", 5000).unwrap();
        assert_eq!(endpoint.host(), "0.0.0.0");
        assert!(endpoint.addr().ip().is_unspecified());
    }

    #[test]
    fn unresolvable_host_is_invalid_address() {
        let err = Endpoint::resolve("no such host!", 1).unwrap_err();
        assert!(matches!(err, TransportError::InvalidAddress { .. }));
    }

    #[test]
    fn unspecified_local_matches_family() {
        let v4 = Endpoint::resolve("127.0.0.1", 1).unwrap();
        assert_eq!(v4.unspecified_local(), "0.0.0.0:0".parse().unwrap());

        let v6 = Endpoint::from_addr("[::1]:7".parse().unwrap());
        assert_eq!(v6.unspecified_local(), "[::]:0".parse().unwrap());
    }
}
