use chrono::{DateTime, Duration, Utc};
use ip_network::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::ids::{DeviceId, NetworkId, PeerId, TenantId};
use crate::key::ENCODED_KEY_LEN;

/// How long after `last_handshake` a peer is still considered active.
///
/// Deliberately an injectable value rather than a constant: different
/// deployments tune this, and tests need to shrink it.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessWindow(pub Duration);

impl Default for FreshnessWindow {
    fn default() -> Self {
        Self(Duration::minutes(3))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    pub id: PeerId,
    pub network_id: NetworkId,
    pub device_id: DeviceId,
    pub tenant: TenantId,
    pub public_key: String,
    pub preshared_key: Option<String>,
    pub endpoint: Option<String>,
    pub allowed_ips: Vec<IpNetwork>,
    pub persistent_keepalive: u16,
    pub last_handshake: Option<DateTime<Utc>>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub disabled_at: Option<DateTime<Utc>>,
}

impl Peer {
    pub fn validate(&self) -> crate::Result<()> {
        if self.public_key.len() != ENCODED_KEY_LEN {
            return Err(crate::Error::validation(format!(
                "public_key must be {ENCODED_KEY_LEN} characters"
            )));
        }

        if self.allowed_ips.is_empty() {
            return Err(crate::Error::validation(
                "allowed_ips must not be empty",
            ));
        }

        Ok(())
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled_at.is_some()
    }

    /// Recomputes `active` from `last_handshake` against `window`.
    pub fn recompute_active(&mut self, window: FreshnessWindow, now: DateTime<Utc>) {
        self.active = self
            .last_handshake
            .is_some_and(|handshake| now - handshake <= window.0);
    }
}

/// Patch applied by `PeerStore::update_stats`.
///
/// A `None` endpoint must never overwrite a previously stored one: the
/// driver reports no endpoint while a peer is idle, and forgetting the
/// last known address would break roaming reconnects.
#[derive(Debug, Clone, Default)]
pub struct PeerStatsUpdate {
    pub endpoint: Option<String>,
    pub last_handshake: Option<DateTime<Utc>>,
    pub rx_bytes: Option<u64>,
    pub tx_bytes: Option<u64>,
}
