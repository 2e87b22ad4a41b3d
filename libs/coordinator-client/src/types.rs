use goconnect_model::{Platform, TunnelConfig};
use serde::{Deserialize, Serialize};

/// Body of `POST /v1/devices`.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub platform: Platform,
    pub pubkey: String,
    pub hostname: String,
    pub os_version: String,
    pub daemon_ver: String,
}

impl DeviceInfo {
    /// Describes the machine this daemon runs on.
    pub fn from_host(pubkey: String, daemon_ver: impl Into<String>) -> Self {
        let hostname = hostname();
        Self {
            name: hostname.clone().unwrap_or_else(|| "unknown-device".to_string()),
            platform: Platform::current(),
            pubkey,
            hostname: hostname.unwrap_or_default(),
            os_version: os_version(),
            daemon_ver: daemon_ver.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterResponse {
    pub id: String,
    /// Coordinators that mint a device-scoped token on registration
    /// return it here; ones that keep the login token omit it.
    #[serde(default)]
    pub token: Option<String>,
}

/// Body of `POST /v1/devices/{id}/heartbeat`.
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatInfo {
    pub daemon_ver: String,
    pub os_version: String,
}

impl HeartbeatInfo {
    pub fn current(daemon_ver: impl Into<String>) -> Self {
        Self {
            daemon_ver: daemon_ver.into(),
            os_version: os_version(),
        }
    }
}

fn os_version() -> String {
    os_info::get().version().to_string()
}

/// Returns the hostname, or `None` if it is unset or not valid UTF-8.
fn hostname() -> Option<String> {
    hostname::get().ok().and_then(|name| name.into_string().ok())
}

/// `GET /v1/devices/{id}/config` response: the full replacement tunnel config.
pub type ConfigResponse = TunnelConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub interval: u64,
    pub expires_in: u64,
}

/// Body of `POST /v1/auth/device/token`.
#[derive(Debug, Clone, Serialize)]
pub struct PollDeviceTokenRequest<'a> {
    pub device_code: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceTokenResponse {
    pub access_token: String,
}

/// The standard device-authorization polling outcomes.
///
/// `authorization_pending` and `slow_down` are recoverable; everything
/// else terminates the login flow.
#[derive(Debug, Clone)]
pub enum DeviceTokenPoll {
    Success(DeviceTokenResponse),
    AuthorizationPending,
    SlowDown,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}
