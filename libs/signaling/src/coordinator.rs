//! Production signaling transport: a websocket session against the
//! coordinator's relay, reconnecting with exponential backoff.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures::{SinkExt, StreamExt};
use goconnect_model::{Error, ErrorKind, PeerId, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::{AnswerHandler, CandidateHandler, OfferHandler, Signaling};

/// The JSON envelope exchanged over the coordinator's signaling
/// websocket; the relay only reads `target` to route it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    Offer {
        source: PeerId,
        target: PeerId,
        ufrag: String,
        pwd: String,
    },
    Answer {
        source: PeerId,
        target: PeerId,
        ufrag: String,
        pwd: String,
    },
    Candidate {
        source: PeerId,
        target: PeerId,
        candidate: String,
    },
}

impl WireMessage {
    pub fn target(&self) -> PeerId {
        match self {
            WireMessage::Offer { target, .. }
            | WireMessage::Answer { target, .. }
            | WireMessage::Candidate { target, .. } => *target,
        }
    }

    /// Replaces the embedded source. The relay uses this to make the
    /// authenticated session, not the client-controlled payload, the
    /// source of identity.
    pub fn set_source(&mut self, source: PeerId) {
        match self {
            WireMessage::Offer { source: s, .. }
            | WireMessage::Answer { source: s, .. }
            | WireMessage::Candidate { source: s, .. } => *s = source,
        }
    }
}

#[derive(Default)]
struct Handlers {
    on_offer: Mutex<Option<OfferHandler>>,
    on_answer: Mutex<Option<AnswerHandler>>,
    on_candidate: Mutex<Option<CandidateHandler>>,
}

impl Handlers {
    fn dispatch(&self, message: WireMessage) {
        match message {
            WireMessage::Offer { source, ufrag, pwd, .. } => {
                if let Some(handler) = self.on_offer.lock().expect("lock poisoned").as_ref() {
                    handler(source, ufrag, pwd);
                }
            }
            WireMessage::Answer { source, ufrag, pwd, .. } => {
                if let Some(handler) = self.on_answer.lock().expect("lock poisoned").as_ref() {
                    handler(source, ufrag, pwd);
                }
            }
            WireMessage::Candidate { source, candidate, .. } => {
                if let Some(handler) = self.on_candidate.lock().expect("lock poisoned").as_ref() {
                    handler(source, candidate);
                }
            }
        }
    }
}

pub struct CoordinatorSignaling {
    id: PeerId,
    outbound: mpsc::UnboundedSender<Message>,
    handlers: Arc<Handlers>,
}

impl CoordinatorSignaling {
    /// Connects to `url` (expected to already carry the auth token as a
    /// query parameter or header set up by the caller) and spawns the
    /// background reconnect loop.
    pub fn connect(url: Url, id: PeerId) -> Arc<Self> {
        let handlers = Arc::new(Handlers::default());
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(run(url, outbound_rx, Arc::clone(&handlers)));

        Arc::new(Self {
            id,
            outbound: outbound_tx,
            handlers,
        })
    }

    fn enqueue(&self, message: WireMessage) -> Result<()> {
        let json = serde_json::to_string(&message)
            .map_err(|e| Error::new(ErrorKind::Internal, format!("failed to encode signaling message: {e}")))?;

        self.outbound
            .send(Message::Text(json.into()))
            .map_err(|_| Error::new(ErrorKind::Unavailable, "signaling session is closed"))
    }
}

#[async_trait]
impl Signaling for CoordinatorSignaling {
    async fn send_offer(&self, target: PeerId, ufrag: String, pwd: String) -> Result<()> {
        self.enqueue(WireMessage::Offer { source: self.id, target, ufrag, pwd })
    }

    async fn send_answer(&self, target: PeerId, ufrag: String, pwd: String) -> Result<()> {
        self.enqueue(WireMessage::Answer { source: self.id, target, ufrag, pwd })
    }

    async fn send_candidate(&self, target: PeerId, candidate: String) -> Result<()> {
        self.enqueue(WireMessage::Candidate { source: self.id, target, candidate })
    }

    fn on_offer(&self, handler: OfferHandler) {
        *self.handlers.on_offer.lock().expect("lock poisoned") = Some(handler);
    }

    fn on_answer(&self, handler: AnswerHandler) {
        *self.handlers.on_answer.lock().expect("lock poisoned") = Some(handler);
    }

    fn on_candidate(&self, handler: CandidateHandler) {
        *self.handlers.on_candidate.lock().expect("lock poisoned") = Some(handler);
    }
}

/// Owns the websocket connection: reconnects with backoff, forwards
/// queued outbound messages, and dispatches inbound ones to `handlers`.
async fn run(url: Url, mut outbound: mpsc::UnboundedReceiver<Message>, handlers: Arc<Handlers>) {
    let mut backoff = new_backoff();

    loop {
        let stream = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(error) => {
                let delay = backoff.next_backoff().unwrap_or(Duration::from_secs(60));
                tracing::warn!(%error, delay_secs = delay.as_secs(), "signaling connection failed, retrying");
                tokio::time::sleep(delay).await;
                continue;
            }
        };

        backoff.reset();
        tracing::info!("signaling connection established");

        let (mut write, mut read) = stream.split();

        loop {
            tokio::select! {
                outgoing = outbound.recv() => {
                    match outgoing {
                        Some(message) => {
                            if let Err(error) = write.send(message).await {
                                tracing::warn!(%error, "failed to write signaling message, reconnecting");
                                break;
                            }
                        }
                        None => return,
                    }
                }
                incoming = read.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<WireMessage>(&text) {
                                Ok(message) => handlers.dispatch(message),
                                Err(error) => tracing::debug!(%error, "dropping malformed signaling message"),
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(error)) => {
                            tracing::warn!(%error, "signaling connection error, reconnecting");
                            break;
                        }
                        None => {
                            tracing::warn!("signaling connection closed, reconnecting");
                            break;
                        }
                    }
                }
            }
        }
    }
}

fn new_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: Duration::from_secs(1),
        initial_interval: Duration::from_secs(1),
        max_interval: Duration::from_secs(60),
        max_elapsed_time: None,
        ..Default::default()
    }
}
