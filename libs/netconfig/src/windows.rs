use std::net::IpAddr;

use goconnect_model::{InterfaceAddress, Result};
use ip_network::IpNetwork;

use crate::command::{run_best_effort, run_idempotent};
use crate::NetworkConfigurator;

pub struct WindowsConfigurator;

impl NetworkConfigurator for WindowsConfigurator {
    fn configure_interface(&self, name: &str, addresses: &[InterfaceAddress], dns: &[IpAddr], mtu: u32) -> Result<()> {
        for address in addresses {
            let arg = format!("address={address}");
            run_idempotent("netsh", &["interface", "ipv4", "add", "address", &format!("name={name}"), &arg])?;
        }

        run_idempotent(
            "netsh",
            &["interface", "ipv4", "set", "subinterface", name, &format!("mtu={mtu}"), "store=persistent"],
        )?;

        if let Some(first) = dns.first() {
            let dns_string = first.to_string();
            run_idempotent("netsh", &["interface", "ip", "set", "dns", name, "static", &dns_string])?;
        }

        for extra in dns.iter().skip(1) {
            run_best_effort("netsh", &["interface", "ip", "add", "dns", name, &extra.to_string()]);
        }

        Ok(())
    }

    fn add_routes(&self, name: &str, routes: &[IpNetwork]) -> Result<()> {
        for route in routes {
            run_idempotent("netsh", &["interface", "ip", "add", "route", &route.to_string(), name])?;
        }
        Ok(())
    }
}
