//! The device-authorization login flow.
//!
//! A daemon asks for a device code, tells its user to open the
//! verification page, and polls until someone approves the code. The
//! approval endpoint here stands in for the (out of scope) web app's
//! consent page, which is also why nothing on this surface requires
//! prior authentication.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::AppState;

const POLL_INTERVAL_SECS: u64 = 5;
const EXPIRES_IN_SECS: u64 = 900;

#[derive(Default)]
pub struct DeviceAuth {
    /// Keyed by device code.
    sessions: Mutex<HashMap<String, Session>>,
}

struct Session {
    user_code: String,
    token: Option<String>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub(crate) struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    interval: u64,
    expires_in: u64,
}

pub(crate) async fn request_code(State(state): State<Arc<AppState>>) -> Json<DeviceCodeResponse> {
    let device_code = Uuid::new_v4().to_string();
    let user_code = user_code();

    state.auth.sessions.lock().insert(
        device_code.clone(),
        Session {
            user_code: user_code.clone(),
            token: None,
            expires_at: Utc::now() + Duration::seconds(EXPIRES_IN_SECS as i64),
        },
    );

    tracing::info!(%user_code, "issued device code");

    Json(DeviceCodeResponse {
        device_code,
        user_code,
        verification_uri: "/activate".to_string(),
        interval: POLL_INTERVAL_SECS,
        expires_in: EXPIRES_IN_SECS,
    })
}

#[derive(Debug, Deserialize)]
pub(crate) struct PollRequest {
    device_code: String,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Serialize)]
struct AuthErrorBody {
    error: &'static str,
}

fn auth_error(error: &'static str) -> Response {
    (StatusCode::BAD_REQUEST, Json(AuthErrorBody { error })).into_response()
}

pub(crate) async fn poll_token(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PollRequest>,
) -> Response {
    let mut sessions = state.auth.sessions.lock();

    let Some(session) = sessions.get(&request.device_code) else {
        return auth_error("invalid_grant");
    };

    if session.expires_at < Utc::now() {
        sessions.remove(&request.device_code);
        return auth_error("expired_token");
    }

    match &session.token {
        Some(token) => {
            let response = TokenResponse { access_token: token.clone() };
            sessions.remove(&request.device_code);
            Json(response).into_response()
        }
        None => auth_error("authorization_pending"),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApproveRequest {
    user_code: String,
}

/// Marks a pending session as approved and mints its access token.
pub(crate) async fn approve(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ApproveRequest>,
) -> StatusCode {
    let mut sessions = state.auth.sessions.lock();

    let Some(session) = sessions
        .values_mut()
        .find(|session| session.user_code == request.user_code && session.expires_at >= Utc::now())
    else {
        return StatusCode::NOT_FOUND;
    };

    session.token = Some(Uuid::new_v4().to_string());
    StatusCode::NO_CONTENT
}

/// Short, human-typable, unambiguous enough for a consent page.
fn user_code() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_ascii_uppercase()
}
