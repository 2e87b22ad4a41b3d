use std::net::IpAddr;

use goconnect_model::{InterfaceAddress, Result};
use ip_network::IpNetwork;

use crate::command::{run_best_effort, run_idempotent};
use crate::NetworkConfigurator;

pub struct LinuxConfigurator;

impl NetworkConfigurator for LinuxConfigurator {
    fn configure_interface(&self, name: &str, addresses: &[InterfaceAddress], dns: &[IpAddr], mtu: u32) -> Result<()> {
        for address in addresses {
            run_idempotent("ip", &["addr", "add", &address.to_string(), "dev", name])?;
        }

        run_idempotent("ip", &["link", "set", "dev", name, "mtu", &mtu.to_string()])?;
        run_idempotent("ip", &["link", "set", "dev", name, "up"])?;

        if !dns.is_empty() {
            let mut args = vec!["dns", name];
            let dns_strings: Vec<String> = dns.iter().map(IpAddr::to_string).collect();
            args.extend(dns_strings.iter().map(String::as_str));
            run_best_effort("resolvectl", &args);
        }

        Ok(())
    }

    fn add_routes(&self, name: &str, routes: &[IpNetwork]) -> Result<()> {
        for route in routes {
            run_idempotent("ip", &["route", "add", &route.to_string(), "dev", name])?;
        }
        Ok(())
    }
}
