use serde::{Deserialize, Serialize};

/// The ICE agent's connection states, as surfaced to status consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Failed,
    Closed,
    Disconnected,
}

impl IceConnectionState {
    pub fn is_terminal_success(self) -> bool {
        matches!(self, IceConnectionState::Connected | IceConnectionState::Completed)
    }

    pub fn is_failure(self) -> bool {
        matches!(self, IceConnectionState::Failed | IceConnectionState::Disconnected)
    }
}

impl std::fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IceConnectionState::New => "New",
            IceConnectionState::Checking => "Checking",
            IceConnectionState::Connected => "Connected",
            IceConnectionState::Completed => "Completed",
            IceConnectionState::Failed => "Failed",
            IceConnectionState::Closed => "Closed",
            IceConnectionState::Disconnected => "Disconnected",
        };
        f.write_str(s)
    }
}

/// Snapshot returned by `PeerConnectionManager::get_peer_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerConnectionStatus {
    pub connected: bool,
    pub connection_state: String,
    pub local_candidate: Option<String>,
    pub remote_candidate: Option<String>,
    pub latency_ms: Option<f64>,
}

impl PeerConnectionStatus {
    pub fn disconnected() -> Self {
        Self {
            connected: false,
            connection_state: IceConnectionState::Disconnected.to_string(),
            local_candidate: None,
            remote_candidate: None,
            latency_ms: None,
        }
    }
}
