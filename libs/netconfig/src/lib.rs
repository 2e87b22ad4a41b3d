//! OS network configurator (C7): sets interface addresses, MTU, DNS and
//! routes. Every operation is idempotent: applying the same values
//! twice must be a no-op, so "already exists" failures from the
//! underlying tool are swallowed rather than surfaced.

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
mod command;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::LinuxConfigurator as OsConfigurator;

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
pub use macos::MacosConfigurator as OsConfigurator;

#[cfg(target_os = "windows")]
mod windows;
#[cfg(target_os = "windows")]
pub use windows::WindowsConfigurator as OsConfigurator;

use std::net::IpAddr;

use goconnect_model::{InterfaceAddress, Result};
use ip_network::IpNetwork;

pub trait NetworkConfigurator: Send + Sync {
    fn configure_interface(&self, name: &str, addresses: &[InterfaceAddress], dns: &[IpAddr], mtu: u32) -> Result<()>;
    fn add_routes(&self, name: &str, routes: &[IpNetwork]) -> Result<()>;
}
