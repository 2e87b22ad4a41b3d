//! In-process signaling, used by tests and single-process demos: every
//! registered peer lives in the same hub and messages are delivered
//! synchronously, mirroring the coordinator's per-peer routing without
//! any network hop.

use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use goconnect_model::{Error, ErrorKind, PeerId, Result};

use crate::{AnswerHandler, CandidateHandler, OfferHandler, Signaling};

#[derive(Default)]
pub struct InProcessHub {
    peers: DashMap<PeerId, Weak<InProcessSignaling>>,
}

impl InProcessHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `id` in the hub and returns its signaling handle.
    pub fn register(self: &Arc<Self>, id: PeerId) -> Arc<InProcessSignaling> {
        let signaling = Arc::new(InProcessSignaling {
            id,
            hub: Arc::clone(self),
            on_offer: Mutex::new(None),
            on_answer: Mutex::new(None),
            on_candidate: Mutex::new(None),
        });

        self.peers.insert(id, Arc::downgrade(&signaling));
        signaling
    }

    fn lookup(&self, id: PeerId) -> Option<Arc<InProcessSignaling>> {
        self.peers.get(&id).and_then(|entry| entry.upgrade())
    }
}

pub struct InProcessSignaling {
    id: PeerId,
    hub: Arc<InProcessHub>,
    on_offer: Mutex<Option<OfferHandler>>,
    on_answer: Mutex<Option<AnswerHandler>>,
    on_candidate: Mutex<Option<CandidateHandler>>,
}

fn target_unknown(target: PeerId) -> Error {
    Error::new(ErrorKind::NotFound, format!("signaling target {target} unknown"))
}

#[async_trait]
impl Signaling for InProcessSignaling {
    async fn send_offer(&self, target: PeerId, ufrag: String, pwd: String) -> Result<()> {
        let peer = self.hub.lookup(target).ok_or_else(|| target_unknown(target))?;
        if let Some(handler) = peer.on_offer.lock().expect("lock poisoned").as_ref() {
            handler(self.id, ufrag, pwd);
        }
        Ok(())
    }

    async fn send_answer(&self, target: PeerId, ufrag: String, pwd: String) -> Result<()> {
        let peer = self.hub.lookup(target).ok_or_else(|| target_unknown(target))?;
        if let Some(handler) = peer.on_answer.lock().expect("lock poisoned").as_ref() {
            handler(self.id, ufrag, pwd);
        }
        Ok(())
    }

    async fn send_candidate(&self, target: PeerId, candidate: String) -> Result<()> {
        let peer = self.hub.lookup(target).ok_or_else(|| target_unknown(target))?;
        if let Some(handler) = peer.on_candidate.lock().expect("lock poisoned").as_ref() {
            handler(self.id, candidate);
        }
        Ok(())
    }

    fn on_offer(&self, handler: OfferHandler) {
        *self.on_offer.lock().expect("lock poisoned") = Some(handler);
    }

    fn on_answer(&self, handler: AnswerHandler) {
        *self.on_answer.lock().expect("lock poisoned") = Some(handler);
    }

    fn on_candidate(&self, handler: CandidateHandler) {
        *self.on_candidate.lock().expect("lock poisoned") = Some(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn delivers_offer_to_registered_peer() {
        let hub = InProcessHub::new();
        let a = hub.register(PeerId::random());
        let b = hub.register(PeerId::random());

        let received = Arc::new(AtomicBool::new(false));
        let received_clone = Arc::clone(&received);
        b.on_offer(Arc::new(move |_source, _ufrag, _pwd| {
            received_clone.store(true, Ordering::SeqCst);
        }));

        a.send_offer(b.id, "ufrag".into(), "pwd".into()).await.unwrap();
        assert!(received.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn send_to_unknown_target_errors() {
        let hub = InProcessHub::new();
        let a = hub.register(PeerId::random());

        let error = a
            .send_offer(PeerId::random(), "ufrag".into(), "pwd".into())
            .await
            .unwrap_err();
        assert_eq!(error.kind, ErrorKind::NotFound);
    }
}
