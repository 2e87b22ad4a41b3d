use goconnect_model::{Result, TunnelConfig};

use crate::{command, TunnelAdapter};

pub struct WireGuardAdapter {
    interface: String,
}

impl WireGuardAdapter {
    pub fn new(interface: impl Into<String>) -> Self {
        Self { interface: interface.into() }
    }
}

impl TunnelAdapter for WireGuardAdapter {
    fn apply_config(&self, config: &TunnelConfig) -> Result<()> {
        command::apply_via_wg_setconf("wg.exe", &self.interface, config)
    }
}
