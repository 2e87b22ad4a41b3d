//! Local control bridge (C9): the loopback HTTP surface the daemon
//! exposes to the local UI/CLI for status queries and token ingestion.
//!
//! The bridge never binds anything but `127.0.0.1`; the port is drawn
//! from a fixed range with a cryptographic RNG at startup so a local
//! web page cannot guess it from a previous run.

mod idle;

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use goconnect_coordinator_client::{CoordinatorClient, DeviceInfo};
use goconnect_identity::Identity;
use goconnect_model::{Error, ErrorKind};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnectionBuilder;
use parking_lot::Mutex;
use rand::Rng as _;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tower::Service as _;
use tower_http::cors::CorsLayer;
use tower_http::timeout::{RequestBodyTimeoutLayer, TimeoutLayer};

/// Ports the bridge may bind, half-open.
pub const DEFAULT_PORT_RANGE: (u16, u16) = (12000, 13000);

/// How many random ports to try before giving up; a loopback range this
/// wide only fills up if something is squatting on it deliberately.
const BIND_ATTEMPTS: usize = 16;

/// Budget for receiving a request body once the headers are in.
const READ_TIMEOUT: Duration = Duration::from_secs(10);
/// Budget for receiving the request head itself.
const READ_HEADER_TIMEOUT: Duration = Duration::from_secs(5);
/// Budget for producing and writing the response.
const WRITE_TIMEOUT: Duration = Duration::from_secs(15);
/// Keep-alive connections with no traffic at all are dropped after this.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct BridgeState {
    pub identity: Arc<Mutex<Identity>>,
    pub client: Arc<CoordinatorClient>,
    pub wg_active: Arc<AtomicBool>,
    pub daemon_version: String,
}

/// Binds a loopback listener on a random port within `range`.
pub async fn bind(range: (u16, u16)) -> std::io::Result<TcpListener> {
    let mut last_error = None;

    for _ in 0..BIND_ATTEMPTS {
        let port = rand::rngs::OsRng.gen_range(range.0..range.1);
        match TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
            Ok(listener) => return Ok(listener),
            Err(error) => last_error = Some(error),
        }
    }

    Err(last_error.unwrap_or_else(|| std::io::Error::other("no port available in the bridge range")))
}

/// Serves the bridge on `listener` until the task is dropped.
///
/// Connections are served through hyper directly rather than
/// `axum::serve` because the header-read and idle timeouts are
/// connection-level knobs that only exist down there.
pub async fn serve(listener: TcpListener, state: BridgeState) -> std::io::Result<()> {
    let app = router(state);

    loop {
        let (stream, _remote) = listener.accept().await?;
        tokio::spawn(serve_connection(stream, app.clone()));
    }
}

async fn serve_connection(stream: TcpStream, app: Router) {
    let (stream, last_activity) = idle::Tracked::new(stream);

    let service = hyper::service::service_fn(move |request: hyper::Request<Incoming>| {
        app.clone().call(request)
    });

    let mut builder = ConnectionBuilder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(READ_HEADER_TIMEOUT);

    let connection = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    let mut poll_idle = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            result = &mut connection => {
                if let Err(error) = result {
                    tracing::debug!(error = %error, "control-bridge connection ended with an error");
                }
                return;
            }
            _ = poll_idle.tick() => {
                // Dropping the connection future closes the socket.
                if last_activity.lock().elapsed() >= IDLE_TIMEOUT {
                    tracing::debug!("closing idle control-bridge connection");
                    return;
                }
            }
        }
    }
}

fn router(state: BridgeState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/register", post(register))
        // Permissive CORS is for local development; production
        // deployments must restrict the allowed origins.
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(WRITE_TIMEOUT))
        .layer(RequestBodyTimeoutLayer::new(READ_TIMEOUT))
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub running: bool,
    pub version: String,
    pub device: DeviceStatus,
    pub wg: WgStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub registered: bool,
    pub public_key: String,
    /// Always present in the JSON (as `null` when unregistered) so CLI
    /// consumers don't need to special-case field absence.
    pub device_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WgStatus {
    pub active: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub status: String,
    pub device_id: String,
}

async fn status(State(state): State<BridgeState>) -> Json<StatusResponse> {
    let (registered, public_key, device_id) = {
        let identity = state.identity.lock();
        (
            identity.is_registered(),
            identity.public_key_base64(),
            identity.device_id().map(String::from),
        )
    };

    Json(StatusResponse {
        running: true,
        version: state.daemon_version.clone(),
        device: DeviceStatus { registered, public_key, device_id },
        wg: WgStatus { active: state.wg_active.load(Ordering::Relaxed) },
    })
}

/// Registers this device with the coordinator using an ingested token
/// and persists the issued device id.
async fn register(
    State(state): State<BridgeState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let pubkey = state.identity.lock().public_key_base64();
    let info = DeviceInfo::from_host(pubkey, &state.daemon_version);

    let response = state.client.register(&request.token, &info).await.map_err(ApiError)?;

    let device_token = response.token.unwrap_or(request.token);
    state
        .identity
        .lock()
        .set_registration(response.id.clone(), device_token)
        .map_err(|error| {
            tracing::error!(%error, "failed to persist device registration");
            ApiError(Error::new(ErrorKind::Internal, "failed to persist registration"))
        })?;

    tracing::info!(device_id = %response.id, "device registered via control bridge");

    Ok(Json(RegisterResponse { status: "success".to_string(), device_id: response.id }))
}

struct ApiError(Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind {
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict | ErrorKind::IpExhausted => StatusCode::CONFLICT,
            ErrorKind::Unauthorized | ErrorKind::TokenExpired | ErrorKind::InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            }
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            // The bridge itself is fine; the coordinator is not.
            ErrorKind::Unavailable => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(self.0)).into_response()
    }
}
