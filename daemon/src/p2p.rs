//! Wires the peer-connection manager to the coordinator's signaling
//! relay and mirrors every pulled config's peer set into it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use goconnect_engine::Engine;
use goconnect_identity::Identity;
use goconnect_model::{ErrorKind, PeerId};
use goconnect_peer_manager::{PeerConnectionManager, DEFAULT_DEADLINE};
use goconnect_signaling::CoordinatorSignaling;
use parking_lot::Mutex;
use url::Url;

/// Waits for registration, attaches signaling, then keeps the manager's
/// peer set in sync with the coordinator's view. Returns early (leaving
/// the daemon without direct tunnels, but otherwise functional) if the
/// device id cannot serve as a signaling address.
pub async fn run(
    engine: Arc<Engine>,
    identity: Arc<Mutex<Identity>>,
    coordinator_url: Url,
    stun_url: Option<String>,
) {
    let cancellation = engine.cancellation_token();

    let own_id = loop {
        let parsed = identity.lock().device_id().map(|id| id.parse::<PeerId>());
        match parsed {
            Some(Ok(id)) => break id,
            Some(Err(_)) => {
                tracing::warn!("device id is not a valid signaling address, peer-to-peer disabled");
                return;
            }
            None => {}
        }
        tokio::select! {
            _ = cancellation.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
    };

    let url = match signaling_url(&coordinator_url, own_id) {
        Ok(url) => url,
        Err(error) => {
            tracing::warn!(%error, "peer-to-peer connections disabled");
            return;
        }
    };

    let signaling = CoordinatorSignaling::connect(url, own_id);
    let manager = PeerConnectionManager::new(
        signaling,
        stun_url,
        Arc::new(|peer_id, _conn| {
            tracing::info!(%peer_id, "direct peer connection established");
        }),
    );
    manager.start();
    tracing::info!(%own_id, "peer-connection manager attached to signaling");

    engine.set_config_listener(move |config| {
        let desired: HashSet<PeerId> = config.peers.iter().filter_map(|peer| peer.peer_id).collect();

        for existing in manager.list_peers() {
            if !desired.contains(&existing) {
                tracing::info!(peer_id = %existing, "peer left the network, dropping its connection");
                manager.remove_peer(existing);
            }
        }

        let known: HashSet<PeerId> = manager.list_peers().into_iter().collect();
        for &peer_id in &desired {
            if peer_id == own_id || known.contains(&peer_id) {
                continue;
            }
            // Exactly one side dials, the lower id; the other answers
            // the incoming offer. Without this rule both sides would
            // offer simultaneously and reject each other as duplicates.
            if own_id > peer_id {
                continue;
            }

            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                match manager.connect(peer_id, DEFAULT_DEADLINE).await {
                    Ok(()) => {}
                    Err(error) if error.kind == ErrorKind::Conflict => {}
                    Err(error) => tracing::debug!(%peer_id, %error, "peer connect attempt failed"),
                }
            });
        }
    });
}

fn signaling_url(coordinator: &Url, peer_id: PeerId) -> Result<Url> {
    let mut url = coordinator.join("v1/signaling")?;

    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => anyhow::bail!("coordinator URL has unsupported scheme {other}"),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("failed to derive websocket URL from the coordinator URL"))?;
    url.query_pairs_mut().append_pair("peer_id", &peer_id.to_string());

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signaling_url_swaps_scheme_and_appends_peer_id() {
        let peer_id = PeerId::random();
        let url = signaling_url(&Url::parse("https://coord.example/").unwrap(), peer_id).unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/v1/signaling");
        assert_eq!(url.query(), Some(format!("peer_id={peer_id}").as_str()));
    }

    #[test]
    fn non_http_scheme_is_rejected() {
        assert!(signaling_url(&Url::parse("ftp://coord.example/").unwrap(), PeerId::random()).is_err());
    }
}
