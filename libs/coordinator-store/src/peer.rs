//! The peer store: single source of truth for which peers exist in
//! which network.

use std::collections::HashMap;

use chrono::Utc;
use goconnect_model::{DeviceId, Error, FreshnessWindow, NetworkId, Peer, PeerId, PeerStatsUpdate, Result, TenantId};
use parking_lot::RwLock;
use uuid::Uuid;

pub trait PeerStore: Send + Sync {
    fn create(&self, peer: Peer) -> Result<Peer>;
    fn get_by_id(&self, id: PeerId) -> Result<Peer>;
    fn get_by_network_and_device(&self, network_id: NetworkId, device_id: DeviceId) -> Result<Peer>;
    fn get_by_public_key(&self, public_key: &str) -> Result<Peer>;
    fn get_by_network_id(&self, network_id: NetworkId) -> Vec<Peer>;
    fn get_by_device_id(&self, device_id: DeviceId) -> Vec<Peer>;
    fn get_all_active(&self) -> Vec<Peer>;
    fn get_active_peers(&self, network_id: NetworkId) -> Vec<Peer>;
    fn update(&self, peer: Peer) -> Result<Peer>;
    fn update_stats(&self, id: PeerId, update: PeerStatsUpdate) -> Result<Peer>;
    fn delete(&self, id: PeerId) -> Result<()>;
    fn hard_delete(&self, id: PeerId) -> Result<()>;
    fn list_by_tenant(&self, tenant: TenantId, limit: usize, offset: usize) -> Vec<Peer>;
}

pub struct InMemoryPeerStore {
    freshness: FreshnessWindow,
    peers: RwLock<HashMap<PeerId, Peer>>,
}

impl InMemoryPeerStore {
    pub fn new(freshness: FreshnessWindow) -> Self {
        Self { freshness, peers: RwLock::new(HashMap::new()) }
    }
}

impl Default for InMemoryPeerStore {
    fn default() -> Self {
        Self::new(FreshnessWindow::default())
    }
}

fn not_found(id: PeerId) -> Error {
    Error::not_found(format!("peer {id} not found"))
}

impl PeerStore for InMemoryPeerStore {
    fn create(&self, mut peer: Peer) -> Result<Peer> {
        let mut peers = self.peers.write();

        let conflict = peers
            .values()
            .any(|existing| !existing.is_disabled() && existing.network_id == peer.network_id && existing.device_id == peer.device_id);
        if conflict {
            return Err(Error::conflict(format!(
                "peer already exists for network {} and device {}",
                peer.network_id, peer.device_id
            )));
        }

        if peer.id.as_uuid() == Uuid::nil() {
            peer.id = PeerId::random();
        }

        let now = Utc::now();
        peer.created_at = now;
        peer.updated_at = now;

        peers.insert(peer.id, peer.clone());
        Ok(peer)
    }

    fn get_by_id(&self, id: PeerId) -> Result<Peer> {
        self.peers
            .read()
            .get(&id)
            .filter(|peer| !peer.is_disabled())
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    fn get_by_network_and_device(&self, network_id: NetworkId, device_id: DeviceId) -> Result<Peer> {
        self.peers
            .read()
            .values()
            .find(|peer| !peer.is_disabled() && peer.network_id == network_id && peer.device_id == device_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("no peer for network {network_id} and device {device_id}")))
    }

    fn get_by_public_key(&self, public_key: &str) -> Result<Peer> {
        self.peers
            .read()
            .values()
            .find(|peer| !peer.is_disabled() && peer.public_key == public_key)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("no peer with public key {public_key}")))
    }

    fn get_by_network_id(&self, network_id: NetworkId) -> Vec<Peer> {
        self.peers
            .read()
            .values()
            .filter(|peer| !peer.is_disabled() && peer.network_id == network_id)
            .cloned()
            .collect()
    }

    fn get_by_device_id(&self, device_id: DeviceId) -> Vec<Peer> {
        self.peers
            .read()
            .values()
            .filter(|peer| !peer.is_disabled() && peer.device_id == device_id)
            .cloned()
            .collect()
    }

    fn get_all_active(&self) -> Vec<Peer> {
        self.peers.read().values().filter(|peer| !peer.is_disabled() && peer.active).cloned().collect()
    }

    fn get_active_peers(&self, network_id: NetworkId) -> Vec<Peer> {
        self.peers
            .read()
            .values()
            .filter(|peer| !peer.is_disabled() && peer.active && peer.network_id == network_id)
            .cloned()
            .collect()
    }

    fn update(&self, mut peer: Peer) -> Result<Peer> {
        let mut peers = self.peers.write();
        let existing = peers.get(&peer.id).filter(|existing| !existing.is_disabled()).ok_or_else(|| not_found(peer.id))?;

        peer.created_at = existing.created_at;
        peer.updated_at = Utc::now();
        peers.insert(peer.id, peer.clone());
        Ok(peer)
    }

    fn update_stats(&self, id: PeerId, update: PeerStatsUpdate) -> Result<Peer> {
        let mut peers = self.peers.write();
        let peer = peers.get_mut(&id).filter(|peer| !peer.is_disabled()).ok_or_else(|| not_found(id))?;

        if let Some(endpoint) = update.endpoint {
            if !endpoint.is_empty() {
                peer.endpoint = Some(endpoint);
            }
        }
        if let Some(last_handshake) = update.last_handshake {
            peer.last_handshake = Some(last_handshake);
        }
        if let Some(rx_bytes) = update.rx_bytes {
            peer.rx_bytes = rx_bytes;
        }
        if let Some(tx_bytes) = update.tx_bytes {
            peer.tx_bytes = tx_bytes;
        }

        let now = Utc::now();
        peer.recompute_active(self.freshness, now);
        peer.updated_at = now;
        Ok(peer.clone())
    }

    fn delete(&self, id: PeerId) -> Result<()> {
        let mut peers = self.peers.write();
        let peer = peers.get_mut(&id).filter(|peer| !peer.is_disabled()).ok_or_else(|| not_found(id))?;

        let now = Utc::now();
        peer.disabled_at = Some(now);
        peer.active = false;
        peer.updated_at = now;
        Ok(())
    }

    fn hard_delete(&self, id: PeerId) -> Result<()> {
        self.peers.write().remove(&id);
        Ok(())
    }

    fn list_by_tenant(&self, tenant: TenantId, limit: usize, offset: usize) -> Vec<Peer> {
        let mut matching: Vec<Peer> =
            self.peers.read().values().filter(|peer| !peer.is_disabled() && peer.tenant == tenant).cloned().collect();
        matching.sort_by_key(|peer| (peer.created_at, peer.id.as_uuid()));
        matching.into_iter().skip(offset).take(limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use goconnect_model::{DeviceId, NetworkId, TenantId};
    use uuid::Uuid;

    fn new_peer(network_id: NetworkId, device_id: DeviceId) -> Peer {
        let now = Utc::now();
        Peer {
            id: PeerId::from_uuid(Uuid::nil()),
            network_id,
            device_id,
            tenant: TenantId::random(),
            public_key: "a".repeat(44),
            preshared_key: None,
            endpoint: None,
            allowed_ips: vec!["10.0.0.2/32".parse().unwrap()],
            persistent_keepalive: 25,
            last_handshake: None,
            rx_bytes: 0,
            tx_bytes: 0,
            active: false,
            created_at: now,
            updated_at: now,
            disabled_at: None,
        }
    }

    #[test]
    fn create_generates_id_and_rejects_duplicate() {
        let store = InMemoryPeerStore::default();
        let network_id = NetworkId::random();
        let device_id = DeviceId::random();

        let created = store.create(new_peer(network_id, device_id)).unwrap();
        assert_ne!(created.id.as_uuid(), Uuid::nil());

        let error = store.create(new_peer(network_id, device_id)).unwrap_err();
        assert_eq!(error.kind, goconnect_model::ErrorKind::Conflict);
    }

    #[test]
    fn delete_is_soft_and_excludes_from_every_lookup() {
        let store = InMemoryPeerStore::default();
        let network_id = NetworkId::random();
        let device_id = DeviceId::random();
        let peer = store.create(new_peer(network_id, device_id)).unwrap();

        store.delete(peer.id).unwrap();

        assert!(store.get_by_id(peer.id).is_err());
        assert!(store.get_by_network_and_device(network_id, device_id).is_err());
        assert!(store.get_by_public_key(&peer.public_key).is_err());
        assert!(store.get_by_network_id(network_id).is_empty());
        assert!(store.get_by_device_id(device_id).is_empty());
        assert!(store.get_all_active().is_empty());
        assert!(store.get_active_peers(network_id).is_empty());
        assert!(store.list_by_tenant(peer.tenant, 10, 0).is_empty());
        assert!(store.update(peer.clone()).is_err());
        assert!(store.delete(peer.id).is_err());

        // Only the physical remove still reaches the row.
        store.hard_delete(peer.id).unwrap();
    }

    #[test]
    fn update_stats_ignores_empty_endpoint_and_recomputes_active() {
        let store = InMemoryPeerStore::new(FreshnessWindow(Duration::minutes(3)));
        let peer = store.create(new_peer(NetworkId::random(), DeviceId::random())).unwrap();

        let with_endpoint = store
            .update_stats(
                peer.id,
                PeerStatsUpdate {
                    endpoint: Some("1.2.3.4:51820".into()),
                    last_handshake: Some(Utc::now()),
                    rx_bytes: Some(100),
                    tx_bytes: Some(200),
                },
            )
            .unwrap();
        assert_eq!(with_endpoint.endpoint.as_deref(), Some("1.2.3.4:51820"));
        assert!(with_endpoint.active);

        let after_empty = store.update_stats(peer.id, PeerStatsUpdate { endpoint: Some(String::new()), ..Default::default() }).unwrap();
        assert_eq!(after_empty.endpoint.as_deref(), Some("1.2.3.4:51820"));
    }

    #[test]
    fn soft_deleted_device_can_rejoin_the_network() {
        let store = InMemoryPeerStore::default();
        let network_id = NetworkId::random();
        let device_id = DeviceId::random();

        let first = store.create(new_peer(network_id, device_id)).unwrap();
        assert_eq!(store.create(new_peer(network_id, device_id)).unwrap_err().kind, goconnect_model::ErrorKind::Conflict);

        store.delete(first.id).unwrap();

        let rejoined = store.create(new_peer(network_id, device_id)).unwrap();
        assert_eq!(store.get_by_network_and_device(network_id, device_id).unwrap().id, rejoined.id);

        // The soft-deleted row is still physically present until hard-deleted.
        store.hard_delete(first.id).unwrap();
    }

    #[test]
    fn stale_handshake_marks_peer_inactive() {
        let store = InMemoryPeerStore::new(FreshnessWindow(Duration::minutes(3)));
        let peer = store.create(new_peer(NetworkId::random(), DeviceId::random())).unwrap();

        let stale = store
            .update_stats(
                peer.id,
                PeerStatsUpdate {
                    last_handshake: Some(Utc::now() - Duration::minutes(10)),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!stale.active);
        assert!(store.get_active_peers(stale.network_id).is_empty());
    }

    #[test]
    fn list_by_tenant_paginates_past_end_without_error() {
        let store = InMemoryPeerStore::default();
        let tenant = TenantId::random();
        let mut peer = new_peer(NetworkId::random(), DeviceId::random());
        peer.tenant = tenant;
        store.create(peer).unwrap();

        assert_eq!(store.list_by_tenant(tenant, 10, 0).len(), 1);
        assert!(store.list_by_tenant(tenant, 10, 50).is_empty());
    }
}
