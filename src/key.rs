//! Client keys partition rate-limit state per caller.

use crate::error::KeyError;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Non-empty identifier for a caller, normally its network address without the port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientKey(String);

impl ClientKey {
    /// Build a key from an arbitrary identifier. Surrounding whitespace is trimmed.
    pub fn new(key: impl Into<String>) -> Result<Self, KeyError> {
        let key: String = key.into();
        let trimmed = key.trim();
        if trimmed.is_empty() {
            return Err(KeyError::Empty);
        }
        if trimmed.len() == key.len() {
            Ok(Self(key))
        } else {
            Ok(Self(trimmed.to_string()))
        }
    }

    /// Build a key from a peer address as reported by the transport.
    ///
    /// `host:port` and `[v6]:port` lose their port, whether the host is an IP, a name, or a
    /// zoned IPv6 literal. Anything without a port (a bare IP, a unix socket path, a
    /// proxy-provided name) is used as is.
    pub fn from_peer_addr(peer: &str) -> Result<Self, KeyError> {
        let peer = peer.trim();
        if let Ok(addr) = peer.parse::<SocketAddr>() {
            return Ok(Self::from(addr.ip()));
        }
        Self::new(split_host_port(peer).unwrap_or(peer))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Host part of `host:port` or `[host]:port`. A bare IPv6 address (several colons, no
/// brackets) has no port to strip.
fn split_host_port(peer: &str) -> Option<&str> {
    let (host, port) = peer.rsplit_once(':')?;
    port.parse::<u16>().ok()?;
    match host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        Some(inner) => Some(inner),
        None if !host.contains(':') && !host.contains('[') => Some(host),
        None => None,
    }
}

impl From<IpAddr> for ClientKey {
    fn from(ip: IpAddr) -> Self {
        Self(ip.to_string())
    }
}

impl From<SocketAddr> for ClientKey {
    fn from(addr: SocketAddr) -> Self {
        Self::from(addr.ip())
    }
}

impl AsRef<str> for ClientKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
