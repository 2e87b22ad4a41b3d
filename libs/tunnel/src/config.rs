use std::fmt::Write as _;

use goconnect_model::TunnelConfig;

/// Renders the device-level slice of a [`TunnelConfig`] in the format
/// `wg setconf` accepts: interface addresses, DNS and MTU are not wg
/// device state and are applied separately through the OS configurator.
pub fn render_setconf(config: &TunnelConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "[Interface]");
    let _ = writeln!(out, "PrivateKey={}", config.private_key);

    for peer in &config.peers {
        let _ = writeln!(out);
        let _ = writeln!(out, "[Peer]");
        let _ = writeln!(out, "PublicKey={}", peer.public_key);
        if let Some(psk) = &peer.preshared_key {
            let _ = writeln!(out, "PresharedKey={psk}");
        }
        if let Some(endpoint) = &peer.endpoint {
            let _ = writeln!(out, "Endpoint={endpoint}");
        }
        let allowed_ips = peer
            .allowed_ips
            .iter()
            .map(|cidr| cidr.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let _ = writeln!(out, "AllowedIPs={allowed_ips}");
        let _ = writeln!(out, "PersistentKeepalive={}", peer.persistent_keepalive);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use goconnect_model::TunnelPeerConfig;

    #[test]
    fn renders_interface_and_peer_blocks() {
        let config = TunnelConfig {
            private_key: "priv".into(),
            interface_addresses: vec![],
            dns: vec![],
            mtu: 1420,
            peers: vec![TunnelPeerConfig {
                peer_id: None,
                public_key: "pub".into(),
                preshared_key: Some("psk".into()),
                endpoint: Some("1.2.3.4:51820".into()),
                allowed_ips: vec!["10.0.0.2/32".parse().unwrap()],
                persistent_keepalive: 25,
            }],
        };

        let rendered = render_setconf(&config);
        assert!(rendered.contains("PrivateKey=priv"));
        assert!(rendered.contains("PublicKey=pub"));
        assert!(rendered.contains("PresharedKey=psk"));
        assert!(rendered.contains("Endpoint=1.2.3.4:51820"));
        assert!(rendered.contains("AllowedIPs=10.0.0.2/32"));
        assert!(rendered.contains("PersistentKeepalive=25"));
    }

    #[test]
    fn empty_peer_set_still_replaces_interface_block() {
        let config = TunnelConfig {
            private_key: "priv".into(),
            interface_addresses: vec![],
            dns: vec![],
            mtu: 1420,
            peers: vec![],
        };

        assert_eq!(render_setconf(&config), "[Interface]\nPrivateKey=priv\n");
    }
}
