//! Websocket relay for ICE signaling.
//!
//! Forwards offer/answer/candidate envelopes between connected daemons,
//! looking only at the routing target. Once ICE nominates a pair the
//! coordinator is out of the packet path entirely; this relay exists
//! purely for session setup.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt as _, StreamExt as _};
use goconnect_model::PeerId;
use goconnect_signaling::WireMessage;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::state::AppState;

#[derive(Default)]
pub struct SignalingRelay {
    sessions: Mutex<HashMap<PeerId, mpsc::UnboundedSender<Message>>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConnectParams {
    peer_id: PeerId,
}

pub(crate) async fn connect(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectParams>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| session(state, params.peer_id, socket))
}

async fn session(state: Arc<AppState>, peer_id: PeerId, socket: WebSocket) {
    let (mut write, mut read) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    // Latest session wins: a reconnecting daemon replaces its old entry.
    let mine = tx.clone();
    state.signaling.sessions.lock().insert(peer_id, tx);
    tracing::info!(%peer_id, "signaling session connected");

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                match outgoing {
                    Some(message) => {
                        if write.send(message).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => relay(&state, peer_id, &text),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        tracing::debug!(%peer_id, %error, "signaling session error");
                        break;
                    }
                }
            }
        }
    }

    // Only drop our own registration; a replacement session may already
    // hold the slot.
    let mut sessions = state.signaling.sessions.lock();
    if sessions.get(&peer_id).is_some_and(|current| current.same_channel(&mine)) {
        sessions.remove(&peer_id);
    }
    tracing::info!(%peer_id, "signaling session closed");
}

/// Messages for offline targets are dropped: the transport is lossy by
/// contract and the daemons retry negotiation on their own schedule.
///
/// The envelope's `source` field is client-controlled and therefore
/// untrusted; the id the session authenticated with is stamped over it
/// before forwarding, so no daemon can offer or answer in another
/// device's name.
fn relay(state: &AppState, source: PeerId, raw: &str) {
    let mut message: WireMessage = match serde_json::from_str(raw) {
        Ok(message) => message,
        Err(error) => {
            tracing::debug!(%source, %error, "dropping malformed signaling message");
            return;
        }
    };

    message.set_source(source);

    let target = message.target();
    let Some(session) = state.signaling.sessions.lock().get(&target).cloned() else {
        tracing::debug!(%source, %target, "dropping signaling message for an offline peer");
        return;
    };

    let json = match serde_json::to_string(&message) {
        Ok(json) => json,
        Err(error) => {
            tracing::debug!(%source, %error, "failed to re-encode signaling message");
            return;
        }
    };

    let _ = session.send(Message::Text(json.into()));
}
