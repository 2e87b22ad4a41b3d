//! Shared domain types for the GoConnect control plane: the vocabulary
//! every other crate in the workspace (identity, coordinator-client,
//! signaling, peer-manager, engine, coordinator-store, ipam, ...) builds
//! its own types on top of.

mod error;
mod ice;
mod ids;
mod ipam;
mod key;
mod make_id;
mod network;
mod peer;
mod platform;
mod tunnel;

pub use error::{Error, ErrorKind, Result};
pub use ice::{IceConnectionState, PeerConnectionStatus};
pub use ids::{DeviceId, NetworkId, PeerId, TenantId, UserId};
pub use ipam::IpAllocation;
pub use key::{
    base64_decode, base64_encode, encode_public_key, PublicKey, StaticSecret, ENCODED_KEY_LEN,
};
pub use network::{JoinPolicy, Network, Visibility};
pub use peer::{FreshnessWindow, Peer, PeerStatsUpdate};
pub use platform::Platform;
pub use tunnel::{InterfaceAddress, TunnelConfig, TunnelPeerConfig};
