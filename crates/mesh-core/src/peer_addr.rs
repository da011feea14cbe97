//! PeerAddr: the identity of a peer in the mesh.
//!
//! A peer is identified by the IPv4 address and port it listens on. The pair
//! is the universal set key: views, mirrors and connection maps are all keyed
//! by value equality on it.

use std::fmt::{self, Display, Formatter};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerAddrError {
    #[error("Invalid peer address format: expected ip:port")]
    InvalidFormat,
    #[error("Invalid IPv4 address: {0}")]
    InvalidIp(String),
    #[error("Invalid port: {0}")]
    InvalidPort(String),
}

/// A peer's listen address: IPv4 + port.
///
/// Displays as `"10.0.0.1:8000"` and parses back from the same form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddr {
    ip: Ipv4Addr,
    port: u16,
}

impl PeerAddr {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The four address octets, in network order.
    pub fn octets(&self) -> [u8; 4] {
        self.ip.octets()
    }

    /// Convert to a `SocketAddr` for use with the standard networking APIs.
    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

impl Display for PeerAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl FromStr for PeerAddr {
    type Err = PeerAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip, port) = s.rsplit_once(':').ok_or(PeerAddrError::InvalidFormat)?;
        let ip = ip
            .parse::<Ipv4Addr>()
            .map_err(|_| PeerAddrError::InvalidIp(ip.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| PeerAddrError::InvalidPort(port.to_string()))?;
        Ok(Self { ip, port })
    }
}

impl From<SocketAddrV4> for PeerAddr {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(*addr.ip(), addr.port())
    }
}

impl From<(Ipv4Addr, u16)> for PeerAddr {
    fn from((ip, port): (Ipv4Addr, u16)) -> Self {
        Self::new(ip, port)
    }
}

// Serialize as "ip:port" for consistency in logs, errors, JSON
impl serde::Serialize for PeerAddr {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for PeerAddr {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let addr = PeerAddr::new(Ipv4Addr::new(10, 0, 0, 1), 8000);
        assert_eq!(addr.to_string(), "10.0.0.1:8000");
    }

    #[test]
    fn test_parse() {
        let addr: PeerAddr = "192.168.1.7:9427".parse().unwrap();
        assert_eq!(addr.ip(), Ipv4Addr::new(192, 168, 1, 7));
        assert_eq!(addr.port(), 9427);
    }

    #[test]
    fn test_roundtrip() {
        let original = PeerAddr::new(Ipv4Addr::new(127, 0, 0, 1), 41000);
        let parsed: PeerAddr = original.to_string().parse().unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_missing_port() {
        assert!("10.0.0.1".parse::<PeerAddr>().is_err());
    }

    #[test]
    fn test_invalid_ip() {
        assert!("10.0.0:8000".parse::<PeerAddr>().is_err());
        assert!("not-an-ip:8000".parse::<PeerAddr>().is_err());
        // IPv6 is not an identity in this mesh
        assert!("[::1]:8000".parse::<PeerAddr>().is_err());
    }

    #[test]
    fn test_invalid_port() {
        assert!("10.0.0.1:notaport".parse::<PeerAddr>().is_err());
        assert!("10.0.0.1:70000".parse::<PeerAddr>().is_err());
        assert!("10.0.0.1:".parse::<PeerAddr>().is_err());
    }

    #[test]
    fn test_equality_is_by_value() {
        let a: PeerAddr = "10.0.0.1:8000".parse().unwrap();
        let b = PeerAddr::new(Ipv4Addr::new(10, 0, 0, 1), 8000);
        assert_eq!(a, b);

        let c = PeerAddr::new(Ipv4Addr::new(10, 0, 0, 1), 8001);
        assert_ne!(a, c);
    }

    #[test]
    fn test_to_socket_addr() {
        let addr = PeerAddr::new(Ipv4Addr::new(127, 0, 0, 1), 8000);
        let sock = addr.to_socket_addr();
        assert_eq!(sock.port(), 8000);
        assert!(sock.is_ipv4());
    }

    #[test]
    fn test_serde_as_string() {
        let addr = PeerAddr::new(Ipv4Addr::new(10, 0, 0, 1), 8000);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"10.0.0.1:8000\"");

        let parsed: PeerAddr = serde_json::from_str(&json).unwrap();
        assert_eq!(addr, parsed);
    }
}
