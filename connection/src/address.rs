//! Peer addressing: dial targets and address book records.

use crate::error::Error;
use bitcoin::p2p::address::{AddrV2, AddrV2Message, Address as LegacyAddress};
use bitcoin::p2p::ServiceFlags;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// Minimum protocol version for basic compatibility with modern bitcoin nodes.
pub const MIN_PROTOCOL_VERSION: u32 = 70001;
/// Protocol version which introduced AddrV2 messages (BIP155).
pub const ADDRV2_MIN_PROTOCOL_VERSION: u32 = 70016;
/// Protocol version advertised by default.
pub const DEFAULT_PROTOCOL_VERSION: u32 = 70016;

/// A dial target: a hostname or literal IP with a port.
///
/// Hostnames are resolved by the connector at connect time. Literal
/// addresses skip resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint from a host (name or literal IP) and port.
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The hostname or IP literal.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The socket address if the host is an IP literal.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.host
            .parse::<IpAddr>()
            .ok()
            .map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::new(addr.ip().to_string(), addr.port())
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    /// Parse `host:port`, `a.b.c.d:port` or `[v6]:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(addr.into());
        }

        let (host, port) = s.rsplit_once(':').ok_or(Error::ResolveFailed)?;
        if host.is_empty() || host.contains(':') {
            return Err(Error::ResolveFailed);
        }

        let port = port.parse::<u16>().map_err(|_| Error::ResolveFailed)?;
        Ok(Endpoint::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V6(ip)) => write!(f, "[{}]:{}", ip, self.port),
            _ => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

/// One remote endpoint candidate from the address book.
///
/// Equality and hashing consider only the IP and port, the timestamp and
/// services are metadata.
#[derive(Debug, Clone, Copy)]
pub struct Address {
    /// The peer's IP address.
    pub ip: IpAddr,
    /// The port number the peer is listening on.
    pub port: u16,
    /// Last time the address was seen (unix seconds).
    pub timestamp: u32,
    /// The service flags advertised for the peer.
    pub services: ServiceFlags,
}

impl Address {
    /// Create a new address with no timestamp and no known services.
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Address {
            ip,
            port,
            timestamp: 0,
            services: ServiceFlags::NONE,
        }
    }

    /// Returns a copy with the given services and timestamp.
    pub fn with_metadata(mut self, services: ServiceFlags, timestamp: u32) -> Self {
        self.services = services;
        self.timestamp = timestamp;
        self
    }

    /// The socket address of the peer, the authority used for deduplication.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// The peer as a dial target.
    pub fn endpoint(&self) -> Endpoint {
        self.socket_addr().into()
    }

    /// Checks if the peer advertises the specified service.
    pub fn has_service(&self, service: ServiceFlags) -> bool {
        self.services.has(service)
    }

    /// Convert a legacy `addr` entry, skipping non-IP (onion cat) entries.
    pub fn from_legacy(timestamp: u32, address: &LegacyAddress) -> Option<Self> {
        let socket = address.socket_addr().ok()?;
        Some(Address::new(socket.ip(), socket.port()).with_metadata(address.services, timestamp))
    }

    /// Convert an `addrv2` entry, skipping networks we cannot dial.
    pub fn from_addrv2(message: &AddrV2Message) -> Option<Self> {
        let ip = match &message.addr {
            AddrV2::Ipv4(ipv4) => IpAddr::V4(*ipv4),
            AddrV2::Ipv6(ipv6) => IpAddr::V6(*ipv6),
            _ => return None,
        };

        Some(Address::new(ip, message.port).with_metadata(message.services, message.time))
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::new(addr.ip(), addr.port())
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip && self.port == other.port
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ip.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ([address] services: {}, seen: {})",
            self.socket_addr(),
            self.services,
            self.timestamp
        )
    }
}
