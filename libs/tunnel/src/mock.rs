use goconnect_model::{Result, TunnelConfig};
use parking_lot::Mutex;

use crate::TunnelAdapter;

/// Records every applied config in memory instead of touching a real
/// interface, so the engine and CLI can be exercised without root.
#[derive(Default)]
pub struct MockTunnelAdapter {
    applied: Mutex<Vec<TunnelConfig>>,
}

impl MockTunnelAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_applied(&self) -> Option<TunnelConfig> {
        self.applied.lock().last().cloned()
    }

    pub fn applied_count(&self) -> usize {
        self.applied.lock().len()
    }
}

impl TunnelAdapter for MockTunnelAdapter {
    fn apply_config(&self, config: &TunnelConfig) -> Result<()> {
        self.applied.lock().push(config.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use goconnect_model::TunnelConfig;

    #[test]
    fn apply_replaces_not_merges() {
        let adapter = MockTunnelAdapter::new();
        let first = TunnelConfig {
            private_key: "a".into(),
            interface_addresses: vec![],
            dns: vec![],
            mtu: 1420,
            peers: vec![],
        };
        let second = TunnelConfig { private_key: "b".into(), ..first.clone() };

        adapter.apply_config(&first).unwrap();
        adapter.apply_config(&second).unwrap();

        assert_eq!(adapter.applied_count(), 2);
        assert_eq!(adapter.last_applied().unwrap().private_key, "b");
    }
}
