//! RTT probing and the reconnect supervisor.
//!
//! The probe runs for the lifetime of a single negotiated [`IceConn`];
//! the supervisor runs from the moment an established connection fails
//! until the peer reconnects or is removed. Both hold the manager only
//! weakly so dropping it ends them.

use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use goconnect_ice::IceConn;
use goconnect_model::{ErrorKind, PeerId};

use crate::record::PeerRecord;
use crate::{PeerConnectionManager, DEFAULT_DEADLINE};

const PING_INTERVAL: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const PING_TAG: u8 = 0x01;
const PONG_TAG: u8 = 0x02;

/// Sends a tagged timestamp every [`PING_INTERVAL`], echoes anything
/// tagged as a ping, and turns echoed pongs into a latency sample.
/// Returns once `conn` stops yielding data; the state-change watcher is
/// responsible for noticing the failure itself.
pub(crate) async fn run_rtt_probe(manager: Weak<PeerConnectionManager>, peer_id: PeerId, conn: IceConn) {
    let mut ticker = tokio::time::interval(PING_INTERVAL);
    let mut buf = [0u8; 1500];

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let frame = encode_frame(PING_TAG, now_nanos());
                if conn.send(&frame).await.is_err() {
                    break;
                }
            }
            received = conn.recv(&mut buf) => {
                match received {
                    // Anything shorter than tag + timestamp is ignored.
                    Ok(n) if n >= 9 => handle_frame(&manager, peer_id, &conn, &buf[..n]).await,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        }
    }

    tracing::debug!(peer_id = %peer_id, "RTT probe stopped, connection is gone");
}

async fn handle_frame(manager: &Weak<PeerConnectionManager>, peer_id: PeerId, conn: &IceConn, frame: &[u8]) {
    let Some(timestamp) = decode_timestamp(frame) else { return };

    match frame[0] {
        PING_TAG => {
            let pong = encode_frame(PONG_TAG, timestamp);
            let _ = conn.send(&pong).await;
        }
        PONG_TAG => {
            let Some(elapsed_ns) = now_nanos().checked_sub(timestamp) else { return };
            if elapsed_ns == 0 {
                return;
            }
            if let Some(manager) = manager.upgrade() {
                manager.record_latency(peer_id, elapsed_ns as f64 / 1_000_000.0);
            }
        }
        _ => {}
    }
}

/// Retries a failed peer with exponential backoff: one second, doubling,
/// capped at a minute, forever, until the peer reconnects (here or on
/// the remote side) or is removed.
pub(crate) async fn run_reconnect_supervisor(
    manager: Weak<PeerConnectionManager>,
    peer_id: PeerId,
    failed: Arc<PeerRecord>,
) {
    let mut backoff = ExponentialBackoff {
        current_interval: Duration::from_secs(1),
        initial_interval: Duration::from_secs(1),
        randomization_factor: 0.0,
        multiplier: 2.0,
        max_interval: MAX_BACKOFF,
        max_elapsed_time: None,
        ..Default::default()
    };
    let removed = failed.cancelled().clone();

    loop {
        let delay = backoff.next_backoff().unwrap_or(MAX_BACKOFF);
        tokio::select! {
            _ = removed.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let Some(manager) = manager.upgrade() else { return };

        match manager.current_record(peer_id) {
            // The other side reconnected first; a healthy replacement is
            // installed and this supervisor is obsolete.
            Some(current) if !Arc::ptr_eq(&current, &failed) && current.state().is_terminal_success() => {
                return;
            }
            // A replacement negotiation is in flight; check again after
            // the next backoff instead of fighting it.
            Some(current) if !Arc::ptr_eq(&current, &failed) => continue,
            _ => {}
        }

        manager.teardown(peer_id, &failed).await;

        tracing::info!(peer_id = %peer_id, "reconnecting peer");
        match manager.connect(peer_id, DEFAULT_DEADLINE).await {
            Ok(()) => return,
            Err(error) if error.kind == ErrorKind::Conflict => {
                tracing::debug!(peer_id = %peer_id, "reconnect yielded to a concurrent negotiation");
            }
            Err(error) => tracing::warn!(peer_id = %peer_id, %error, "reconnect attempt failed"),
        }
    }
}

fn encode_frame(tag: u8, timestamp_ns: u64) -> [u8; 9] {
    let mut frame = [0u8; 9];
    frame[0] = tag;
    frame[1..9].copy_from_slice(&timestamp_ns.to_le_bytes());
    frame
}

fn decode_timestamp(frame: &[u8]) -> Option<u64> {
    let bytes = frame.get(1..9)?;
    Some(u64::from_le_bytes(bytes.try_into().expect("slice is 8 bytes")))
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the epoch")
        .as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_round_trip() {
        let frame = encode_frame(PING_TAG, 123_456_789);
        assert_eq!(frame[0], PING_TAG);
        assert_eq!(decode_timestamp(&frame), Some(123_456_789));
    }

    #[test]
    fn short_frames_have_no_timestamp() {
        assert_eq!(decode_timestamp(&[PING_TAG, 1, 2]), None);
        assert_eq!(decode_timestamp(&[]), None);
    }
}
