//! Bidirectional named-message channel between two peer ids via the
//! coordinator (C3).
//!
//! The peer-connection manager (C5) treats this as a lossy transport:
//! duplicate and late candidates must be tolerated, and every send is
//! best-effort except when the target is outright unknown.

mod coordinator;
mod in_process;

use std::sync::Arc;

use async_trait::async_trait;
use goconnect_model::{PeerId, Result};

/// `(source_peer, ufrag, pwd)`.
pub type OfferHandler = Arc<dyn Fn(PeerId, String, String) + Send + Sync>;
/// `(source_peer, ufrag, pwd)`.
pub type AnswerHandler = Arc<dyn Fn(PeerId, String, String) + Send + Sync>;
/// `(source_peer, candidate_string)`.
pub type CandidateHandler = Arc<dyn Fn(PeerId, String) + Send + Sync>;

/// The capability set the peer-connection manager needs from a signaling
/// transport. A single callback is registered per event kind; the
/// manager never needs more than one subscriber.
#[async_trait]
pub trait Signaling: Send + Sync {
    async fn send_offer(&self, target: PeerId, ufrag: String, pwd: String) -> Result<()>;
    async fn send_answer(&self, target: PeerId, ufrag: String, pwd: String) -> Result<()>;
    async fn send_candidate(&self, target: PeerId, candidate: String) -> Result<()>;

    fn on_offer(&self, handler: OfferHandler);
    fn on_answer(&self, handler: AnswerHandler);
    fn on_candidate(&self, handler: CandidateHandler);
}

pub use coordinator::{CoordinatorSignaling, WireMessage};
pub use in_process::{InProcessHub, InProcessSignaling};
