//! IP allocator (C11): hands out host addresses within a network's CIDR.
//!
//! `next_ip` takes an already-parsed [`Ipv4Network`] rather than a raw
//! CIDR string, so "IPv4 only" is a type-level guarantee instead of a
//! runtime check; `goconnect_model::Network::cidr` is `Ipv4Network`
//! for the same reason.

use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;

use goconnect_model::{Error, ErrorKind, IpAllocation, NetworkId, Result, UserId};
use ip_network::Ipv4Network;
use parking_lot::RwLock;

/// Offset `0` is the network address and is never handed out; an offset
/// past the last usable host, or a prefix with no usable hosts at all
/// (`/31`, `/32`), yields `None` rather than an error; the caller
/// decides whether that means "range exhausted".
pub fn next_ip(cidr: Ipv4Network, offset: u32) -> Option<Ipv4Addr> {
    let host_bits = 32 - u32::from(cidr.netmask());
    let usable = if host_bits >= 2 { (1u64 << host_bits) - 2 } else { 0 };

    if offset == 0 || u64::from(offset) > usable {
        return None;
    }

    let base: u32 = cidr.network_address().into();
    Some(Ipv4Addr::from(base + offset))
}

pub trait IpAllocator: Send + Sync {
    /// Returns the user's existing allocation in `network_id` if one is
    /// open, otherwise assigns the smallest free offset `>= 1`.
    fn get_or_allocate(&self, network_id: NetworkId, user_id: UserId, cidr: Ipv4Network) -> Result<IpAllocation>;

    /// Frees the user's allocation, if any; a no-op otherwise.
    fn release(&self, network_id: NetworkId, user_id: UserId);
}

#[derive(Default)]
struct NetworkAllocations {
    offset_by_user: HashMap<UserId, u32>,
    used_offsets: BTreeSet<u32>,
}

#[derive(Default)]
pub struct InMemoryIpAllocator {
    networks: RwLock<HashMap<NetworkId, NetworkAllocations>>,
}

impl InMemoryIpAllocator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IpAllocator for InMemoryIpAllocator {
    fn get_or_allocate(&self, network_id: NetworkId, user_id: UserId, cidr: Ipv4Network) -> Result<IpAllocation> {
        let mut networks = self.networks.write();
        let allocations = networks.entry(network_id).or_default();

        if let Some(&offset) = allocations.offset_by_user.get(&user_id) {
            let ip = next_ip(cidr, offset).expect("a persisted offset was valid when assigned");
            return Ok(IpAllocation { network_id, user_id, ip: ip.to_string(), offset });
        }

        let mut offset = 1u32;
        loop {
            let Some(ip) = next_ip(cidr, offset) else {
                return Err(Error::new(ErrorKind::IpExhausted, format!("no free address left in {cidr}")));
            };

            if !allocations.used_offsets.contains(&offset) {
                allocations.used_offsets.insert(offset);
                allocations.offset_by_user.insert(user_id, offset);
                return Ok(IpAllocation { network_id, user_id, ip: ip.to_string(), offset });
            }

            offset += 1;
        }
    }

    fn release(&self, network_id: NetworkId, user_id: UserId) {
        let mut networks = self.networks.write();
        if let Some(allocations) = networks.get_mut(&network_id) {
            if let Some(offset) = allocations.offset_by_user.remove(&user_id) {
                allocations.used_offsets.remove(&offset);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cidr() -> Ipv4Network {
        "10.0.0.0/30".parse().unwrap()
    }

    #[test]
    fn next_ip_excludes_network_and_broadcast() {
        let cidr = cidr();
        assert_eq!(next_ip(cidr, 0), None);
        assert_eq!(next_ip(cidr, 1), Some("10.0.0.1".parse().unwrap()));
        assert_eq!(next_ip(cidr, 2), Some("10.0.0.2".parse().unwrap()));
        assert_eq!(next_ip(cidr, 3), None);
    }

    #[test]
    fn slash_31_and_32_have_no_usable_hosts() {
        assert_eq!(next_ip("10.0.0.0/31".parse().unwrap(), 1), None);
        assert_eq!(next_ip("10.0.0.0/32".parse().unwrap(), 1), None);
    }

    #[test]
    fn next_ip_matches_known_offsets() {
        let slash_24: Ipv4Network = "10.0.0.0/24".parse().unwrap();
        assert_eq!(next_ip(slash_24, 1), Some("10.0.0.1".parse().unwrap()));
        assert_eq!(next_ip(slash_24, 254), Some("10.0.0.254".parse().unwrap()));
        assert_eq!(next_ip(slash_24, 255), None);

        // Offsets walk straight through octet boundaries.
        let slash_16: Ipv4Network = "10.0.0.0/16".parse().unwrap();
        assert_eq!(next_ip(slash_16, 256), Some("10.0.1.0".parse().unwrap()));
    }

    #[test]
    fn released_offset_is_reused_lowest_first() {
        let allocator = InMemoryIpAllocator::new();
        let network_id = NetworkId::random();
        let cidr: Ipv4Network = "10.0.0.0/29".parse().unwrap(); // six usable hosts

        let users: Vec<UserId> = (0..5).map(|_| UserId::random()).collect();
        for (i, user) in users.iter().enumerate() {
            let allocation = allocator.get_or_allocate(network_id, *user, cidr).unwrap();
            assert_eq!(allocation.offset, i as u32 + 1);
        }

        allocator.release(network_id, users[2]);

        let next = allocator.get_or_allocate(network_id, UserId::random(), cidr).unwrap();
        assert_eq!(next.offset, 3);
        assert_eq!(next.ip, "10.0.0.3");
    }

    #[test]
    fn reuses_existing_allocation_for_the_same_user() {
        let allocator = InMemoryIpAllocator::new();
        let network_id = NetworkId::random();
        let user_id = UserId::random();

        let first = allocator.get_or_allocate(network_id, user_id, cidr()).unwrap();
        let second = allocator.get_or_allocate(network_id, user_id, cidr()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn release_lets_the_next_allocation_reuse_the_offset() {
        let allocator = InMemoryIpAllocator::new();
        let network_id = NetworkId::random();
        let a = UserId::random();
        let b = UserId::random();

        let first = allocator.get_or_allocate(network_id, a, cidr()).unwrap();
        allocator.release(network_id, a);

        let second = allocator.get_or_allocate(network_id, b, cidr()).unwrap();
        assert_eq!(second.offset, first.offset);
    }

    #[test]
    fn exhausted_range_is_reported() {
        let allocator = InMemoryIpAllocator::new();
        let network_id = NetworkId::random();

        allocator.get_or_allocate(network_id, UserId::random(), cidr()).unwrap();
        allocator.get_or_allocate(network_id, UserId::random(), cidr()).unwrap();

        let error = allocator.get_or_allocate(network_id, UserId::random(), cidr()).unwrap_err();
        assert_eq!(error.kind, ErrorKind::IpExhausted);
    }
}
