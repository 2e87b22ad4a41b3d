use std::net::IpAddr;

use goconnect_model::{InterfaceAddress, Result};
use ip_network::IpNetwork;
use parking_lot::Mutex;

use crate::NetworkConfigurator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceCall {
    pub name: String,
    pub addresses: Vec<InterfaceAddress>,
    pub dns: Vec<IpAddr>,
    pub mtu: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutesCall {
    pub name: String,
    pub routes: Vec<IpNetwork>,
}

/// Records every call in memory instead of touching the host's network
/// stack, so the engine can be tested without root.
#[derive(Default)]
pub struct MockNetworkConfigurator {
    interface_calls: Mutex<Vec<InterfaceCall>>,
    route_calls: Mutex<Vec<RoutesCall>>,
}

impl MockNetworkConfigurator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interface_calls(&self) -> Vec<InterfaceCall> {
        self.interface_calls.lock().clone()
    }

    pub fn route_calls(&self) -> Vec<RoutesCall> {
        self.route_calls.lock().clone()
    }
}

impl NetworkConfigurator for MockNetworkConfigurator {
    fn configure_interface(&self, name: &str, addresses: &[InterfaceAddress], dns: &[IpAddr], mtu: u32) -> Result<()> {
        self.interface_calls.lock().push(InterfaceCall {
            name: name.to_string(),
            addresses: addresses.to_vec(),
            dns: dns.to_vec(),
            mtu,
        });
        Ok(())
    }

    fn add_routes(&self, name: &str, routes: &[IpNetwork]) -> Result<()> {
        self.route_calls.lock().push(RoutesCall { name: name.to_string(), routes: routes.to_vec() });
        Ok(())
    }
}
