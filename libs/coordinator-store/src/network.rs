//! The network store: virtual LANs and their CIDR ranges.

use std::collections::HashMap;

use chrono::Utc;
use goconnect_model::{Error, JoinPolicy, Network, NetworkId, Result, TenantId, UserId, Visibility};
use ip_network::Ipv4Network;
use parking_lot::RwLock;

/// Input to [`NetworkStore::create`]; id and timestamps are assigned by
/// the store.
#[derive(Debug, Clone)]
pub struct NewNetwork {
    pub tenant: TenantId,
    pub name: String,
    pub cidr: Ipv4Network,
    pub visibility: Visibility,
    pub join_policy: JoinPolicy,
    pub created_by: UserId,
}

pub trait NetworkStore: Send + Sync {
    /// Rejects a CIDR whose host bits are set, a name already used by a
    /// non-deleted network in the same tenant, and a CIDR overlapping
    /// any non-deleted network in the same tenant. Other tenants'
    /// networks never conflict.
    fn create(&self, network: NewNetwork) -> Result<Network>;

    /// `NotFound` if absent or soft-deleted.
    fn get_by_id(&self, id: NetworkId) -> Result<Network>;

    /// Excludes soft-deleted networks.
    fn list_by_tenant(&self, tenant: TenantId) -> Vec<Network>;

    /// Soft delete; the name and CIDR become reusable within the tenant.
    fn delete(&self, id: NetworkId) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryNetworkStore {
    networks: RwLock<HashMap<NetworkId, Network>>,
}

impl InMemoryNetworkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(id: NetworkId) -> Error {
    Error::not_found(format!("network {id} not found"))
}

impl NetworkStore for InMemoryNetworkStore {
    fn create(&self, network: NewNetwork) -> Result<Network> {
        Network::validate_cidr(network.cidr)?;

        let mut networks = self.networks.write();

        for existing in networks.values() {
            if existing.is_deleted() || existing.tenant != network.tenant {
                continue;
            }
            if existing.name == network.name {
                return Err(Error::conflict(format!(
                    "network name {} is already in use",
                    network.name
                )));
            }
            if existing.overlaps(&network.cidr) {
                return Err(Error::conflict(format!(
                    "CIDR {} overlaps network {} ({})",
                    network.cidr, existing.name, existing.cidr
                )));
            }
        }

        let created = Network {
            id: NetworkId::random(),
            tenant: network.tenant,
            name: network.name,
            cidr: network.cidr,
            visibility: network.visibility,
            join_policy: network.join_policy,
            created_by: network.created_by,
            created_at: Utc::now(),
            soft_deleted_at: None,
        };

        networks.insert(created.id, created.clone());
        Ok(created)
    }

    fn get_by_id(&self, id: NetworkId) -> Result<Network> {
        self.networks
            .read()
            .get(&id)
            .filter(|network| !network.is_deleted())
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    fn list_by_tenant(&self, tenant: TenantId) -> Vec<Network> {
        let mut matching: Vec<Network> = self
            .networks
            .read()
            .values()
            .filter(|network| !network.is_deleted() && network.tenant == tenant)
            .cloned()
            .collect();
        matching.sort_by_key(|network| (network.created_at, network.id.as_uuid()));
        matching
    }

    fn delete(&self, id: NetworkId) -> Result<()> {
        let mut networks = self.networks.write();
        let network = networks.get_mut(&id).filter(|network| !network.is_deleted()).ok_or_else(|| not_found(id))?;
        network.soft_deleted_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_network(tenant: TenantId, name: &str, cidr: &str) -> NewNetwork {
        NewNetwork {
            tenant,
            name: name.to_string(),
            cidr: cidr.parse().unwrap(),
            visibility: Visibility::Private,
            join_policy: JoinPolicy::Open,
            created_by: UserId::random(),
        }
    }

    #[test]
    fn rejects_cidr_with_host_bits_set() {
        let store = InMemoryNetworkStore::new();
        let error = store.create(new_network(TenantId::random(), "lan", "10.0.0.1/24")).unwrap_err();
        assert_eq!(error.kind, goconnect_model::ErrorKind::Validation);
    }

    #[test]
    fn rejects_overlap_within_tenant_but_not_across_tenants() {
        let store = InMemoryNetworkStore::new();
        let tenant = TenantId::random();

        store.create(new_network(tenant, "lan", "10.0.0.0/16")).unwrap();

        let error = store.create(new_network(tenant, "other", "10.0.1.0/24")).unwrap_err();
        assert_eq!(error.kind, goconnect_model::ErrorKind::Conflict);

        // The identical CIDR is fine in another tenant.
        store.create(new_network(TenantId::random(), "lan", "10.0.0.0/16")).unwrap();
    }

    #[test]
    fn rejects_duplicate_name_until_soft_deleted() {
        let store = InMemoryNetworkStore::new();
        let tenant = TenantId::random();

        let first = store.create(new_network(tenant, "lan", "10.0.0.0/24")).unwrap();
        let error = store.create(new_network(tenant, "lan", "10.1.0.0/24")).unwrap_err();
        assert_eq!(error.kind, goconnect_model::ErrorKind::Conflict);

        store.delete(first.id).unwrap();
        store.create(new_network(tenant, "lan", "10.0.0.0/24")).unwrap();
    }

    #[test]
    fn soft_delete_excludes_from_lookups() {
        let store = InMemoryNetworkStore::new();
        let tenant = TenantId::random();

        let network = store.create(new_network(tenant, "lan", "10.0.0.0/24")).unwrap();
        assert_eq!(store.list_by_tenant(tenant).len(), 1);

        store.delete(network.id).unwrap();
        assert!(store.get_by_id(network.id).is_err());
        assert!(store.list_by_tenant(tenant).is_empty());
        assert!(store.delete(network.id).is_err());
    }
}
