//! Peer-connection manager (C5), the heart of the system.
//!
//! Owns one [`goconnect_ice::IceAgent`] per remote peer, drives the
//! offer/answer/candidate exchange over a [`Signaling`] transport, and
//! keeps the resulting connection alive: RTT sampling, failure
//! detection, and a backoff-driven reconnect loop. No lock here is ever
//! held across a signaling send, an ICE call, or `dial`/`accept`, only
//! around the maps themselves.

mod monitor;
mod record;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use goconnect_ice::{IceAgent, IceConn};
use goconnect_model::{Error, ErrorKind, IceConnectionState, PeerConnectionStatus, PeerId, Result};
use goconnect_signaling::Signaling;
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;

use record::PeerRecord;

/// Invoked once per peer each time its connection becomes usable; the
/// tunnel adapter (C6) is the intended subscriber.
pub type NewConnectionSink = Arc<dyn Fn(PeerId, IceConn) + Send + Sync>;

/// How long a negotiation may spend waiting for the remote answer and
/// again for the ICE handshake before giving up. The reconnect
/// supervisor uses the same budget for every retry.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// Candidates arriving for a peer we have no agent for (yet) are kept
/// until the agent exists. Bounded, since unknown sources may never
/// produce an agent at all.
const MAX_BUFFERED_CANDIDATES: usize = 32;

type PendingAnswer = oneshot::Sender<(String, String)>;

pub struct PeerConnectionManager {
    signaling: Arc<dyn Signaling>,
    stun_url: Option<String>,
    on_new_connection: NewConnectionSink,
    agents: RwLock<HashMap<PeerId, Arc<PeerRecord>>>,
    pending_answers: Mutex<HashMap<PeerId, PendingAnswer>>,
    pending_candidates: Mutex<HashMap<PeerId, Vec<String>>>,
    latencies: RwLock<HashMap<PeerId, f64>>,
}

impl PeerConnectionManager {
    pub fn new(
        signaling: Arc<dyn Signaling>,
        stun_url: Option<String>,
        on_new_connection: NewConnectionSink,
    ) -> Arc<Self> {
        Arc::new(Self {
            signaling,
            stun_url,
            on_new_connection,
            agents: RwLock::new(HashMap::new()),
            pending_answers: Mutex::new(HashMap::new()),
            pending_candidates: Mutex::new(HashMap::new()),
            latencies: RwLock::new(HashMap::new()),
        })
    }

    /// Registers the three signaling callbacks. Call once, after
    /// construction. The callbacks hold the manager weakly so dropping
    /// the manager tears everything down even while a transport is
    /// still delivering messages.
    pub fn start(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.signaling.on_offer(Arc::new(move |source, ufrag, pwd| {
            let Some(manager) = weak.upgrade() else { return };
            tokio::spawn(async move { manager.handle_offer(source, ufrag, pwd).await });
        }));

        let weak = Arc::downgrade(self);
        self.signaling.on_answer(Arc::new(move |source, ufrag, pwd| {
            let Some(manager) = weak.upgrade() else { return };
            manager.handle_answer(source, ufrag, pwd);
        }));

        let weak = Arc::downgrade(self);
        self.signaling.on_candidate(Arc::new(move |source, candidate| {
            let Some(manager) = weak.upgrade() else { return };
            manager.handle_candidate(source, candidate);
        }));
    }

    /// Initiator path: creates an agent, sends an offer, trickles
    /// candidates, and blocks until the ICE handshake completes or
    /// `deadline` elapses. On any failure the peer id is left unreserved
    /// so a subsequent `connect` can retry cleanly.
    pub async fn connect(self: &Arc<Self>, peer_id: PeerId, deadline: Duration) -> Result<()> {
        let record = self.reserve(peer_id).await?;

        match self.negotiate_as_initiator(peer_id, &record, deadline).await {
            Ok(conn) => {
                self.on_connected(peer_id, record, conn);
                Ok(())
            }
            Err(error) => {
                self.teardown(peer_id, &record).await;
                Err(error)
            }
        }
    }

    /// Responder path, invoked from the `on_offer` signaling callback.
    async fn handle_offer(self: &Arc<Self>, source: PeerId, remote_ufrag: String, remote_pwd: String) {
        let record = match self.reserve(source).await {
            Ok(record) => record,
            Err(error) => {
                tracing::debug!(peer_id = %source, %error, "dropping offer for a peer already being negotiated");
                return;
            }
        };

        let result = self
            .negotiate_as_responder(source, &record, remote_ufrag, remote_pwd, DEFAULT_DEADLINE)
            .await;
        match result {
            Ok(conn) => self.on_connected(source, record, conn),
            Err(error) => {
                tracing::warn!(peer_id = %source, %error, "failed to accept incoming offer");
                self.teardown(source, &record).await;
            }
        }
    }

    fn handle_answer(&self, source: PeerId, ufrag: String, pwd: String) {
        let sender = self.pending_answers.lock().remove(&source);
        match sender {
            Some(sender) => {
                let _ = sender.send((ufrag, pwd));
            }
            None => tracing::debug!(peer_id = %source, "dropping answer with no matching offer in flight"),
        }
    }

    /// Candidates for a known peer go straight to its agent; candidates
    /// that raced ahead of the agent are buffered and drained when the
    /// agent is created. Neither malformed candidates nor unknown
    /// sources are errors.
    fn handle_candidate(&self, source: PeerId, candidate: String) {
        let record = self.agents.read().get(&source).cloned();
        match record {
            Some(record) => record.agent.add_remote_candidate(&candidate),
            None => {
                let mut pending = self.pending_candidates.lock();
                let buffered = pending.entry(source).or_default();
                if buffered.len() < MAX_BUFFERED_CANDIDATES {
                    buffered.push(candidate);
                } else {
                    tracing::debug!(peer_id = %source, "dropping candidate for an unknown peer, buffer is full");
                }
            }
        }
    }

    /// Removes the peer's state entirely; the monitor and any reconnect
    /// supervisor notice and exit. Safe on a non-existent id.
    pub fn remove_peer(&self, peer_id: PeerId) {
        let record = self.agents.write().remove(&peer_id);
        self.pending_answers.lock().remove(&peer_id);
        self.pending_candidates.lock().remove(&peer_id);
        self.latencies.write().remove(&peer_id);

        if let Some(record) = record {
            record.cancel_supervision();
            tokio::spawn(async move { record.agent.close().await });
        }
    }

    pub fn get_peer_status(&self, peer_id: PeerId) -> PeerConnectionStatus {
        let Some(record) = self.agents.read().get(&peer_id).cloned() else {
            return PeerConnectionStatus::disconnected();
        };

        let state = record.state();
        let (local_candidate, remote_candidate) = record.selected_pair.lock().clone().unzip();
        PeerConnectionStatus {
            connected: state.is_terminal_success(),
            connection_state: state.to_string(),
            local_candidate,
            remote_candidate,
            latency_ms: self.latencies.read().get(&peer_id).copied(),
        }
    }

    pub fn list_peers(&self) -> Vec<PeerId> {
        self.agents.read().keys().copied().collect()
    }

    fn record_latency(&self, peer_id: PeerId, latency_ms: f64) {
        self.latencies.write().insert(peer_id, latency_ms);
    }

    pub(crate) fn current_record(&self, peer_id: PeerId) -> Option<Arc<PeerRecord>> {
        self.agents.read().get(&peer_id).cloned()
    }

    /// Checks that `peer_id` is unclaimed and installs a freshly built
    /// agent under it; this is what makes a concurrent second
    /// `connect`/offer for the same peer a `Conflict` rather than a race.
    async fn reserve(self: &Arc<Self>, peer_id: PeerId) -> Result<Arc<PeerRecord>> {
        fn already_exists(peer_id: PeerId) -> Error {
            Error::conflict(format!("a connection to peer {peer_id} already exists"))
        }

        if self.agents.read().contains_key(&peer_id) {
            return Err(already_exists(peer_id));
        }

        let agent = IceAgent::new(self.stun_url.as_deref()).await?;
        let record = Arc::new(PeerRecord::new(agent));
        self.install_watchers(peer_id, &record);

        let lost_race = {
            let mut agents = self.agents.write();
            if agents.contains_key(&peer_id) {
                true
            } else {
                agents.insert(peer_id, Arc::clone(&record));
                false
            }
        };
        if lost_race {
            record.agent.close().await;
            return Err(already_exists(peer_id));
        }

        // Deliver any candidates that arrived before the agent existed.
        let buffered = self.pending_candidates.lock().remove(&peer_id).unwrap_or_default();
        for candidate in &buffered {
            record.agent.add_remote_candidate(candidate);
        }

        Ok(record)
    }

    fn install_watchers(self: &Arc<Self>, peer_id: PeerId, record: &Arc<PeerRecord>) {
        // The agent's callbacks reference the manager and the record
        // weakly: `remove_peer` must be able to drop both directions.
        let pair = Arc::downgrade(record);
        record.agent.on_selected_pair(move |local, remote| {
            if let Some(record) = pair.upgrade() {
                *record.selected_pair.lock() = Some((local, remote));
            }
        });

        let manager = Arc::downgrade(self);
        let watched = Arc::downgrade(record);
        record.agent.on_state_change(move |state: IceConnectionState| {
            let (Some(manager), Some(record)) = (manager.upgrade(), watched.upgrade()) else {
                return;
            };
            let was_stable_for = record.since_last_change();
            record.set_state(state);

            // Failures during negotiation are reported to whoever drives
            // the negotiation; the supervisor only guards connections
            // that were once established.
            if state.is_failure() && record.is_established() && record.try_begin_reconnect() {
                tracing::warn!(peer_id = %peer_id, %state, ?was_stable_for, "peer connection entered a failure state");
                tokio::spawn(monitor::run_reconnect_supervisor(
                    Arc::downgrade(&manager),
                    peer_id,
                    Arc::clone(&record),
                ));
            }
        });
    }

    async fn negotiate_as_initiator(
        self: &Arc<Self>,
        peer_id: PeerId,
        record: &Arc<PeerRecord>,
        deadline: Duration,
    ) -> Result<IceConn> {
        let (ufrag, pwd) = record.agent.local_credentials().await;

        let (tx, rx) = oneshot::channel();
        self.pending_answers.lock().insert(peer_id, tx);

        // Credentials go out first; candidates trickle after.
        if let Err(error) = self.signaling.send_offer(peer_id, ufrag, pwd).await {
            self.pending_answers.lock().remove(&peer_id);
            return Err(error);
        }

        self.start_trickle(peer_id, record)?;

        let answer = tokio::time::timeout(deadline, rx).await;
        let (remote_ufrag, remote_pwd) = match answer {
            Ok(Ok(credentials)) => credentials,
            Ok(Err(_)) => {
                return Err(Error::new(ErrorKind::Internal, "answer channel dropped"));
            }
            Err(_elapsed) => {
                self.pending_answers.lock().remove(&peer_id);
                return Err(Error::new(
                    ErrorKind::Unavailable,
                    format!("no answer from peer {peer_id} before the deadline"),
                ));
            }
        };

        record.agent.dial(deadline, remote_ufrag, remote_pwd).await
    }

    async fn negotiate_as_responder(
        self: &Arc<Self>,
        source: PeerId,
        record: &Arc<PeerRecord>,
        remote_ufrag: String,
        remote_pwd: String,
        deadline: Duration,
    ) -> Result<IceConn> {
        let (ufrag, pwd) = record.agent.local_credentials().await;

        self.signaling
            .send_answer(source, ufrag, pwd)
            .await
            .map_err(|error| {
                Error::new(error.kind, format!("failed to send answer to {source}: {}", error.message))
            })?;

        self.start_trickle(source, record)?;

        record.agent.accept(deadline, remote_ufrag, remote_pwd).await
    }

    /// Starts candidate gathering; every locally gathered candidate is
    /// relayed best-effort, a relay failure is never fatal to the
    /// session.
    fn start_trickle(&self, peer_id: PeerId, record: &Arc<PeerRecord>) -> Result<()> {
        let signaling = Arc::clone(&self.signaling);
        record.agent.gather_candidates(move |candidate| {
            let signaling = Arc::clone(&signaling);
            tokio::spawn(async move {
                if let Err(error) = signaling.send_candidate(peer_id, candidate).await {
                    tracing::debug!(peer_id = %peer_id, %error, "failed to relay local ICE candidate");
                }
            });
        })
    }

    fn on_connected(self: &Arc<Self>, peer_id: PeerId, record: Arc<PeerRecord>, conn: IceConn) {
        record.set_state(IceConnectionState::Connected);
        *record.connection.lock() = Some(Arc::clone(&conn));
        (self.on_new_connection)(peer_id, Arc::clone(&conn));
        tokio::spawn(monitor::run_rtt_probe(Arc::downgrade(self), peer_id, conn));
    }

    /// Removes `record` from the map (only if it is still the installed
    /// entry for `peer_id`) and closes its agent.
    pub(crate) async fn teardown(&self, peer_id: PeerId, record: &Arc<PeerRecord>) {
        let removed = {
            let mut agents = self.agents.write();
            match agents.get(&peer_id) {
                Some(current) if Arc::ptr_eq(current, record) => {
                    agents.remove(&peer_id);
                    true
                }
                _ => false,
            }
        };

        if removed {
            self.latencies.write().remove(&peer_id);
        }

        record.agent.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use goconnect_signaling::InProcessHub;

    fn manager() -> Arc<PeerConnectionManager> {
        let hub = InProcessHub::new();
        let signaling = hub.register(PeerId::random());
        PeerConnectionManager::new(signaling, None, Arc::new(|_, _| {}))
    }

    #[tokio::test]
    async fn unknown_peer_reports_disconnected() {
        let manager = manager();
        let status = manager.get_peer_status(PeerId::random());
        assert!(!status.connected);
        assert_eq!(status.connection_state, "Disconnected");
        assert!(status.latency_ms.is_none());
    }

    #[tokio::test]
    async fn connecting_twice_to_the_same_peer_conflicts() {
        let manager = manager();
        let peer_id = PeerId::random();

        // No responder is registered for `peer_id`, so the first call
        // fails on the offer send, but only after reserving the peer id;
        // a concurrent attempt observes the reservation.
        let record = manager.reserve(peer_id).await.unwrap();

        let error = manager.connect(peer_id, Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(error.kind, goconnect_model::ErrorKind::Conflict);

        manager.teardown(peer_id, &record).await;
    }

    #[tokio::test]
    async fn candidate_for_unknown_peer_is_buffered_not_fatal() {
        let manager = manager();
        let source = PeerId::random();

        manager.handle_candidate(source, "bogus candidate".into());
        manager.handle_candidate(source, "another".into());

        assert_eq!(manager.pending_candidates.lock().get(&source).map(Vec::len), Some(2));
        assert!(manager.list_peers().is_empty());
    }

    #[tokio::test]
    async fn answer_without_matching_offer_is_dropped() {
        let manager = manager();
        manager.handle_answer(PeerId::random(), "ufrag".into(), "pwd".into());
    }

    #[tokio::test]
    async fn remove_peer_clears_all_bookkeeping() {
        let manager = manager();
        let peer_id = PeerId::random();

        let _record = manager.reserve(peer_id).await.unwrap();
        assert_eq!(manager.list_peers(), vec![peer_id]);

        manager.remove_peer(peer_id);
        assert!(manager.list_peers().is_empty());
        assert!(manager.current_record(peer_id).is_none());
    }
}
