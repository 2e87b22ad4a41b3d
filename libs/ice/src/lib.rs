//! Wraps a single `webrtc-ice` session behind the narrow contract the
//! peer-connection manager (C5) actually needs: gather, dial/accept,
//! add a remote candidate, and close.

use std::sync::Arc;
use std::time::Duration;

use goconnect_model::{Error, ErrorKind, IceConnectionState, Result};
use tokio::sync::mpsc;
use webrtc_ice::agent::agent_config::AgentConfig;
use webrtc_ice::agent::Agent;
use webrtc_ice::candidate::{candidate_base::unmarshal_candidate, Candidate};
use webrtc_ice::network_type::NetworkType;
use webrtc_ice::state::ConnectionState;
use webrtc_ice::url::Url as IceUrl;
use webrtc_util::Conn;

/// An established, nominated ICE connection: a plain UDP socket from
/// this point on; the tunnel adapter (C6) owns everything above it.
pub type IceConn = Arc<dyn Conn + Send + Sync>;

pub struct IceAgent {
    agent: Arc<Agent>,
}

impl std::fmt::Debug for IceAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IceAgent").finish_non_exhaustive()
    }
}

impl IceAgent {
    /// Builds a new agent and its single STUN server binding, if any.
    pub async fn new(stun_url: Option<&str>) -> Result<Self> {
        let mut urls = Vec::new();
        if let Some(raw) = stun_url {
            let url = IceUrl::parse_url(raw)
                .map_err(|e| Error::new(ErrorKind::Validation, format!("invalid STUN url {raw}: {e}")))?;
            urls.push(url);
        }

        let config = AgentConfig {
            urls,
            network_types: vec![NetworkType::Udp4],
            ..Default::default()
        };

        let agent = Agent::new(config)
            .await
            .map_err(|e| Error::new(ErrorKind::Internal, format!("failed to create ICE agent: {e}")))?;

        Ok(Self { agent: Arc::new(agent) })
    }

    /// Begins candidate gathering and returns immediately; `on_candidate`
    /// is invoked for every locally discovered candidate as it trickles
    /// in, so callers can announce credentials first and relay candidates
    /// while connectivity checks are already underway.
    pub fn gather_candidates(&self, on_candidate: impl Fn(String) + Send + Sync + 'static) -> Result<()> {
        self.agent.on_candidate(Box::new(move |candidate| {
            match candidate {
                Some(candidate) => on_candidate(candidate.marshal()),
                None => tracing::trace!("local ICE gathering finished"),
            }
            Box::pin(async {})
        }));

        self.agent
            .gather_candidates()
            .map_err(|e| Error::new(ErrorKind::Internal, format!("failed to start ICE gathering: {e}")))
    }

    /// Installs the state-change callback the peer-connection manager's
    /// monitor uses to notice `failed`/`disconnected` transitions.
    pub fn on_state_change(&self, handler: impl Fn(IceConnectionState) + Send + Sync + 'static) {
        self.agent.on_connection_state_change(Box::new(move |state: ConnectionState| {
            handler(map_state(state));
            Box::pin(async {})
        }));
    }

    /// Reports the nominated `(local, remote)` candidate pair, in
    /// marshaled form, whenever the agent picks a new one.
    pub fn on_selected_pair(&self, handler: impl Fn(String, String) + Send + Sync + 'static) {
        self.agent.on_selected_candidate_pair_change(Box::new(move |local, remote| {
            handler(local.marshal(), remote.marshal());
            Box::pin(async {})
        }));
    }

    /// Stable for the lifetime of the agent.
    pub async fn local_credentials(&self) -> (String, String) {
        self.agent.get_local_user_credentials().await
    }

    /// Malformed candidates are logged and ignored, matching the
    /// contract: this never surfaces an error to the caller.
    pub fn add_remote_candidate(&self, candidate: &str) {
        let parsed = match unmarshal_candidate(candidate) {
            Ok(c) => c,
            Err(error) => {
                tracing::debug!(%error, %candidate, "dropping malformed remote ICE candidate");
                return;
            }
        };

        let candidate: Arc<dyn Candidate + Send + Sync> = Arc::new(parsed);
        if let Err(error) = self.agent.add_remote_candidate(&candidate) {
            tracing::debug!(%error, "failed to add remote ICE candidate");
        }
    }

    /// Controlling role: blocks until a pair is nominated or `deadline`
    /// elapses.
    pub async fn dial(&self, deadline: Duration, remote_ufrag: String, remote_pwd: String) -> Result<IceConn> {
        let conn: IceConn = self
            .agent
            .dial(cancel_after(deadline), remote_ufrag, remote_pwd)
            .await
            .map_err(|e| Error::new(ErrorKind::Unavailable, format!("ICE dial failed: {e}")))?;

        Ok(conn)
    }

    /// Controlled role: same contract as [`Self::dial`].
    pub async fn accept(&self, deadline: Duration, remote_ufrag: String, remote_pwd: String) -> Result<IceConn> {
        let conn: IceConn = self
            .agent
            .accept(cancel_after(deadline), remote_ufrag, remote_pwd)
            .await
            .map_err(|e| Error::new(ErrorKind::Unavailable, format!("ICE accept failed: {e}")))?;

        Ok(conn)
    }

    /// Idempotent; the agent is not reusable afterward.
    pub async fn close(&self) {
        if let Err(error) = self.agent.close().await {
            tracing::debug!(%error, "error closing ICE agent (already closed is expected)");
        }
    }
}

/// `dial`/`accept` abort when the returned channel yields; arming it with
/// a sleeping task turns the agent's cancel channel into a deadline.
fn cancel_after(deadline: Duration) -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        let _ = tx.send(()).await;
    });
    rx
}

fn map_state(state: ConnectionState) -> IceConnectionState {
    match state {
        ConnectionState::New => IceConnectionState::New,
        ConnectionState::Checking => IceConnectionState::Checking,
        ConnectionState::Connected => IceConnectionState::Connected,
        ConnectionState::Completed => IceConnectionState::Completed,
        ConnectionState::Failed => IceConnectionState::Failed,
        ConnectionState::Disconnected => IceConnectionState::Disconnected,
        ConnectionState::Closed => IceConnectionState::Closed,
        ConnectionState::Unspecified => IceConnectionState::New,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn malformed_remote_candidate_is_ignored() {
        let agent = IceAgent::new(None).await.unwrap();
        agent.add_remote_candidate("definitely not a candidate");
        agent.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let agent = IceAgent::new(None).await.unwrap();
        agent.close().await;
        agent.close().await;
    }

    #[tokio::test]
    async fn invalid_stun_url_is_a_validation_error() {
        let error = IceAgent::new(Some("not-a-url")).await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::Validation);
    }
}
