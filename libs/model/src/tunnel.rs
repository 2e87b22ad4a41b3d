use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ip_network::IpNetwork;
use serde::{Deserialize, Serialize};

/// A host address with an on-link prefix length, e.g. `10.0.0.2/24`.
///
/// Routes are [`IpNetwork`]s (host bits zero by construction); an
/// interface address is the opposite: the host bits are the point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceAddress {
    pub addr: IpAddr,
    pub prefix: u8,
}

impl InterfaceAddress {
    pub fn new(addr: impl Into<IpAddr>, prefix: u8) -> crate::Result<Self> {
        let addr = addr.into();
        let max_prefix = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix > max_prefix {
            return Err(crate::Error::validation(format!(
                "prefix /{prefix} is out of range for {addr}"
            )));
        }
        Ok(Self { addr, prefix })
    }
}

impl fmt::Display for InterfaceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl FromStr for InterfaceAddress {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| crate::Error::validation(format!("expected address/prefix, got {s}")))?;
        let addr: IpAddr = addr
            .parse()
            .map_err(|_| crate::Error::validation(format!("invalid IP address in {s}")))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| crate::Error::validation(format!("invalid prefix length in {s}")))?;
        Self::new(addr, prefix)
    }
}

impl Serialize for InterfaceAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InterfaceAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A single peer entry within a [`TunnelConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelPeerConfig {
    /// The remote device's signaling address; the peer-connection
    /// manager dials NAT traversal for entries that carry one.
    #[serde(default)]
    pub peer_id: Option<crate::PeerId>,
    pub public_key: String,
    pub preshared_key: Option<String>,
    pub endpoint: Option<String>,
    pub allowed_ips: Vec<IpNetwork>,
    pub persistent_keepalive: u16,
}

/// The full replacement configuration handed from the engine (C8) to the
/// tunnel adapter (C6). Applying one of these always *replaces* the
/// previous peer set wholesale; it is never merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
    pub private_key: String,
    pub interface_addresses: Vec<InterfaceAddress>,
    pub dns: Vec<IpAddr>,
    pub mtu: u32,
    pub peers: Vec<TunnelPeerConfig>,
}

impl TunnelConfig {
    /// Union of every peer's allowed-IPs, in stable order, deduplicated.
    ///
    /// Used by the engine to compute the route set to install after a
    /// config has been applied.
    pub fn routes(&self) -> Vec<IpNetwork> {
        let mut seen = Vec::new();
        for peer in &self.peers {
            for route in &peer.allowed_ips {
                if !seen.contains(route) {
                    seen.push(*route);
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_address_round_trips_with_host_bits() {
        let addr: InterfaceAddress = "10.0.0.2/24".parse().unwrap();
        assert_eq!(addr.to_string(), "10.0.0.2/24");
        assert_eq!(addr.prefix, 24);
    }

    #[test]
    fn interface_address_rejects_garbage() {
        assert!("10.0.0.2".parse::<InterfaceAddress>().is_err());
        assert!("10.0.0.2/33".parse::<InterfaceAddress>().is_err());
        assert!("not-an-ip/24".parse::<InterfaceAddress>().is_err());
    }

    #[test]
    fn routes_deduplicate_across_peers() {
        let peer = |allowed: &[&str]| TunnelPeerConfig {
            peer_id: None,
            public_key: "k".repeat(44),
            preshared_key: None,
            endpoint: None,
            allowed_ips: allowed.iter().map(|s| s.parse().unwrap()).collect(),
            persistent_keepalive: 25,
        };

        let config = TunnelConfig {
            private_key: String::new(),
            interface_addresses: vec![],
            dns: vec![],
            mtu: 1420,
            peers: vec![peer(&["10.0.0.1/32", "10.0.1.0/24"]), peer(&["10.0.0.1/32"])],
        };

        assert_eq!(
            config.routes(),
            vec![
                "10.0.0.1/32".parse::<IpNetwork>().unwrap(),
                "10.0.1.0/24".parse::<IpNetwork>().unwrap()
            ]
        );
    }
}
