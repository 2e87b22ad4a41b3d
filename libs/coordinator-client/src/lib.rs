//! HTTPS client the daemon uses to reach the coordinator (C2).
//!
//! Every call classifies its outcome into [`goconnect_model::ErrorKind`]
//! so the engine (C8) can decide what is worth retrying silently versus
//! what should abort an interactive login.

mod types;
mod user_agent;

use goconnect_model::{Error, ErrorKind, Result};
use reqwest::{Client, StatusCode};
use url::Url;

pub use types::{
    ConfigResponse, DeviceCodeResponse, DeviceInfo, DeviceTokenPoll, DeviceTokenResponse,
    HeartbeatInfo, PollDeviceTokenRequest, RegisterResponse,
};

pub struct CoordinatorClient {
    base_url: Url,
    http: Client,
}

impl CoordinatorClient {
    pub fn new(base_url: Url, component_name: &str, app_version: &str) -> Result<Self> {
        let http = Client::builder()
            .user_agent(user_agent::build(component_name, app_version))
            .build()
            .map_err(|e| Error::new(ErrorKind::Internal, format!("failed to build HTTP client: {e}")))?;

        Ok(Self { base_url, http })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::new(ErrorKind::Internal, format!("invalid coordinator path {path}: {e}")))
    }

    /// `POST /v1/devices`.
    pub async fn register(&self, token: &str, info: &DeviceInfo) -> Result<RegisterResponse> {
        let response = self
            .http
            .post(self.url("v1/devices")?)
            .bearer_auth(token)
            .json(info)
            .send()
            .await
            .map_err(classify_transport_error)?;

        decode(response).await
    }

    /// `POST /v1/devices/{id}/heartbeat`.
    pub async fn send_heartbeat(&self, device_id: &str, token: &str, info: &HeartbeatInfo) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("v1/devices/{device_id}/heartbeat"))?)
            .bearer_auth(token)
            .json(info)
            .send()
            .await
            .map_err(classify_transport_error)?;

        expect_no_content(response).await
    }

    /// `GET /v1/devices/{id}/config`.
    pub async fn get_config(&self, device_id: &str, token: &str) -> Result<ConfigResponse> {
        let response = self
            .http
            .get(self.url(&format!("v1/devices/{device_id}/config"))?)
            .bearer_auth(token)
            .send()
            .await
            .map_err(classify_transport_error)?;

        decode(response).await
    }

    /// `POST /v1/auth/device/code`.
    pub async fn request_device_code(&self) -> Result<DeviceCodeResponse> {
        let response = self
            .http
            .post(self.url("v1/auth/device/code")?)
            .send()
            .await
            .map_err(classify_transport_error)?;

        decode(response).await
    }

    /// `POST /v1/auth/device/token`, polled at the interval the device
    /// code response advertised.
    pub async fn poll_device_token(&self, device_code: &str) -> Result<DeviceTokenPoll> {
        let response = self
            .http
            .post(self.url("v1/auth/device/token")?)
            .json(&PollDeviceTokenRequest { device_code })
            .send()
            .await
            .map_err(classify_transport_error)?;

        if response.status().is_success() {
            let body: DeviceTokenResponse = decode_body(response).await?;
            return Ok(DeviceTokenPoll::Success(body));
        }

        let status = response.status();
        let body: types::ErrorBody = response.json().await.unwrap_or(types::ErrorBody {
            error: String::new(),
            error_description: None,
        });

        match body.error.as_str() {
            "authorization_pending" => Ok(DeviceTokenPoll::AuthorizationPending),
            "slow_down" => Ok(DeviceTokenPoll::SlowDown),
            _ => Err(classify_status(status, body.error_description.unwrap_or(body.error))),
        }
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(classify_response_error(response).await);
    }

    decode_body(response).await
}

async fn decode_body<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| Error::new(ErrorKind::Internal, format!("malformed coordinator response: {e}")))
}

async fn expect_no_content(response: reqwest::Response) -> Result<()> {
    if response.status().is_success() {
        return Ok(());
    }

    Err(classify_response_error(response).await)
}

async fn classify_response_error(response: reqwest::Response) -> Error {
    let status = response.status();
    let message = response
        .text()
        .await
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());

    classify_status(status, message)
}

fn classify_status(status: StatusCode, message: impl Into<String>) -> Error {
    let kind = match status {
        StatusCode::UNAUTHORIZED => ErrorKind::Unauthorized,
        StatusCode::FORBIDDEN => ErrorKind::Forbidden,
        StatusCode::NOT_FOUND => ErrorKind::NotFound,
        StatusCode::CONFLICT => ErrorKind::Conflict,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ErrorKind::Validation,
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimited,
        s if s.is_server_error() => ErrorKind::Unavailable,
        _ => ErrorKind::Internal,
    };

    Error::new(kind, message.into()).with_detail("http_status", status.as_str())
}

/// Connection refused, DNS failure, and timeouts are all "the coordinator
/// is not reachable right now" from the engine's point of view.
fn classify_transport_error(error: reqwest::Error) -> Error {
    if error.is_timeout() || error.is_connect() {
        return Error::new(ErrorKind::Unavailable, format!("coordinator unreachable: {error}"));
    }

    Error::new(ErrorKind::Internal, format!("coordinator request failed: {error}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use goconnect_model::Platform;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> CoordinatorClient {
        CoordinatorClient::new(Url::parse(&server.uri()).unwrap(), "goconnect-daemon", "0.1.0").unwrap()
    }

    #[tokio::test]
    async fn register_returns_device_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/devices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "dev-1"})))
            .mount(&server)
            .await;

        let response = client(&server)
            .register(
                "tok",
                &DeviceInfo {
                    name: "laptop".into(),
                    platform: Platform::Linux,
                    pubkey: "p".repeat(44),
                    hostname: "host".into(),
                    os_version: "1".into(),
                    daemon_ver: "0.1.0".into(),
                },
            )
            .await
            .unwrap();

        assert_eq!(response.id, "dev-1");
    }

    #[tokio::test]
    async fn server_error_classified_as_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/devices/dev-1/config"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let error = client(&server).get_config("dev-1", "tok").await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn pending_token_poll_is_recoverable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/device/token"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"error": "authorization_pending"})),
            )
            .mount(&server)
            .await;

        let outcome = client(&server).poll_device_token("code").await.unwrap();
        assert!(matches!(outcome, DeviceTokenPoll::AuthorizationPending));
    }
}
