use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use goconnect_ice::{IceAgent, IceConn};
use goconnect_model::IceConnectionState;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Per-peer connection record: the agent plus whatever has been
/// negotiated on top of it so far.
pub struct PeerRecord {
    pub agent: IceAgent,
    pub connection: Mutex<Option<IceConn>>,
    pub selected_pair: Mutex<Option<(String, String)>>,
    state: Mutex<IceConnectionState>,
    last_state_change: Mutex<Instant>,
    reconnecting: AtomicBool,
    cancel: CancellationToken,
}

impl PeerRecord {
    pub fn new(agent: IceAgent) -> Self {
        Self {
            agent,
            connection: Mutex::new(None),
            selected_pair: Mutex::new(None),
            state: Mutex::new(IceConnectionState::New),
            last_state_change: Mutex::new(Instant::now()),
            reconnecting: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn set_state(&self, state: IceConnectionState) {
        *self.state.lock() = state;
        *self.last_state_change.lock() = Instant::now();
    }

    pub fn state(&self) -> IceConnectionState {
        *self.state.lock()
    }

    /// How long the record has been in its current state.
    pub fn since_last_change(&self) -> std::time::Duration {
        self.last_state_change.lock().elapsed()
    }

    /// True once a connection has been nominated on this agent, i.e. the
    /// record is past negotiation and owned by the monitor.
    pub fn is_established(&self) -> bool {
        self.connection.lock().is_some()
    }

    /// Claims the single reconnect-supervisor slot for this record.
    /// Returns false if a supervisor is already running.
    pub fn try_begin_reconnect(&self) -> bool {
        !self.reconnecting.swap(true, Ordering::SeqCst)
    }

    /// Fires when the peer is explicitly removed; the reconnect
    /// supervisor observes this and stops retrying.
    pub fn cancelled(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel_supervision(&self) {
        self.cancel.cancel();
    }
}
