use crate::ids::{NetworkId, UserId};

/// A single allocated host address within a network's CIDR.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IpAllocation {
    pub network_id: NetworkId,
    pub user_id: UserId,
    pub ip: String,
    pub offset: u32,
}
