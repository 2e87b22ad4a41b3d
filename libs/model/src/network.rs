use chrono::{DateTime, Utc};
use ip_network::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::ids::{NetworkId, TenantId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinPolicy {
    /// Anyone in the tenant may join without approval.
    Open,
    /// An existing member or admin must approve the join.
    Invite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: NetworkId,
    pub tenant: TenantId,
    pub name: String,
    pub cidr: Ipv4Network,
    pub visibility: Visibility,
    pub join_policy: JoinPolicy,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub soft_deleted_at: Option<DateTime<Utc>>,
}

impl Network {
    pub fn is_deleted(&self) -> bool {
        self.soft_deleted_at.is_some()
    }

    /// `cidr` must be the network address, i.e. host bits zero.
    pub fn validate_cidr(cidr: Ipv4Network) -> crate::Result<()> {
        let canonical = Ipv4Network::new_truncate(cidr.network_address(), cidr.netmask())
            .map_err(|e| crate::Error::validation(format!("invalid CIDR: {e}")))?;

        if canonical.network_address() != cidr.network_address() {
            return Err(crate::Error::validation(
                "CIDR must be the network address (host bits must be zero)",
            ));
        }

        Ok(())
    }

    /// Two networks overlap if either network address falls inside the other's range.
    pub fn overlaps(&self, other: &Ipv4Network) -> bool {
        self.cidr.contains(other.network_address()) || other.contains(self.cidr.network_address())
    }
}
