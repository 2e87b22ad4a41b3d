use std::net::IpAddr;

use goconnect_model::{InterfaceAddress, Result};
use ip_network::IpNetwork;

use crate::command::{run_best_effort, run_idempotent};
use crate::NetworkConfigurator;

pub struct MacosConfigurator;

impl NetworkConfigurator for MacosConfigurator {
    fn configure_interface(&self, name: &str, addresses: &[InterfaceAddress], dns: &[IpAddr], mtu: u32) -> Result<()> {
        for address in addresses {
            run_idempotent("ifconfig", &[name, "inet", &address.to_string(), "alias"])?;
        }

        run_idempotent("ifconfig", &[name, "mtu", &mtu.to_string()])?;
        run_idempotent("ifconfig", &[name, "up"])?;

        if !dns.is_empty() {
            let dns_strings: Vec<String> = dns.iter().map(IpAddr::to_string).collect();
            let mut args = vec!["-setdnsservers", name];
            args.extend(dns_strings.iter().map(String::as_str));
            run_best_effort("networksetup", &args);
        }

        Ok(())
    }

    fn add_routes(&self, name: &str, routes: &[IpNetwork]) -> Result<()> {
        for route in routes {
            run_idempotent("route", &["add", "-net", &route.to_string(), "-interface", name])?;
        }
        Ok(())
    }
}
