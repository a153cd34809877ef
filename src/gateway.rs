//! Client for the focus collector backend.
//!
//! The backend exposes three JSON operations: pairing-code verification,
//! session creation and sample ingest. Session and ingest calls are
//! authenticated with `Authorization: Bearer <jwt>`.
//!
//! [`CollectorApi`] is the seam the session controller and the upload
//! pipeline depend on; [`GatewayClient`] is the HTTP implementation.

use crate::core::telemetry::SensorSampleRequest;
use crate::session::AuthToken;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL of the backend functions, e.g. `https://host/functions/v1`
    pub base_url: String,
    /// Project API key sent as the `apikey` header, if the backend wants one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// TCP connect timeout (seconds)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Whole-request timeout (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::new("http://127.0.0.1:54321/functions/v1")
    }
}

impl GatewayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), name)
    }

    pub fn verify_code_url(&self) -> String {
        self.endpoint("verify_code")
    }

    pub fn start_session_url(&self) -> String {
        self.endpoint("start_session")
    }

    pub fn ingest_url(&self) -> String {
        self.endpoint("sensor_sample_ingest")
    }

    /// Root of the backend host, used as a reachability probe.
    pub fn health_url(&self) -> Result<String, GatewayError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| GatewayError::Config(format!("Invalid base URL '{}': {e}", self.base_url)))?;
        url.set_path("/");
        url.set_query(None);
        Ok(url.to_string())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Gateway client error types.
#[derive(Debug, Clone)]
pub enum GatewayError {
    /// Configuration error
    Config(String),
    /// Network/HTTP transport error
    Network(String),
    /// Request did not complete in time
    Timeout,
    /// Server returned a non-success status
    Server { status: u16, message: String },
    /// Server answered 2xx but refused the request
    Rejected(String),
    /// Response could not be decoded
    Serialization(String),
}

impl GatewayError {
    /// Transient failures worth retrying: transport errors, timeouts, 5xx,
    /// 408 and 429.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Network(_) | GatewayError::Timeout => true,
            GatewayError::Server { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }

    /// The backend refused our credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, GatewayError::Server { status: 401 | 403, .. })
    }

    /// Human-readable message, without the error-kind prefix.
    pub fn message(&self) -> String {
        match self {
            GatewayError::Config(msg)
            | GatewayError::Network(msg)
            | GatewayError::Rejected(msg)
            | GatewayError::Serialization(msg) => msg.clone(),
            GatewayError::Timeout => "request timed out".to_string(),
            GatewayError::Server { message, .. } => message.clone(),
        }
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Config(msg) => write!(f, "Gateway config error: {msg}"),
            GatewayError::Network(msg) => write!(f, "Gateway network error: {msg}"),
            GatewayError::Timeout => write!(f, "Gateway request timed out"),
            GatewayError::Server { status, message } => {
                write!(f, "Gateway server error ({status}): {message}")
            }
            GatewayError::Rejected(msg) => write!(f, "Gateway rejected request: {msg}"),
            GatewayError::Serialization(msg) => write!(f, "Gateway serialization error: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout
        } else if e.is_decode() {
            GatewayError::Serialization(e.to_string())
        } else {
            GatewayError::Network(e.to_string())
        }
    }
}

/// Body of `POST /verify_code`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyCodeRequest {
    pub code: String,
    pub device_id: String,
    pub device_type: String,
}

#[derive(Debug, Deserialize)]
struct VerifyCodeResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default, alias = "access_token")]
    jwt: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Body of `POST /start_session`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionRequest {
    pub device_type: String,
}

/// A session created by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartedSession {
    pub session_id: String,
    /// Server-side start time as sent by the backend
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing)]
    pub message: Option<String>,
}

impl StartedSession {
    /// Parsed start time, if the backend sent a valid RFC 3339 timestamp.
    pub fn started_at_utc(&self) -> Option<DateTime<Utc>> {
        self.started_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Acknowledgement of an ingested sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleReceipt {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub sample_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Error body returned by the backend.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

/// The collector backend operations.
#[async_trait]
pub trait CollectorApi: Send + Sync {
    /// Exchange a pairing code for credentials.
    async fn verify_code(
        &self,
        code: &str,
        device_id: &str,
        device_type: &str,
    ) -> Result<AuthToken, GatewayError>;

    /// Open a telemetry session. Duplicate calls may return the same or a
    /// fresh session id.
    async fn start_session(
        &self,
        bearer_token: &str,
        device_type: &str,
    ) -> Result<StartedSession, GatewayError>;

    /// Deliver one sample.
    async fn ingest_sample(
        &self,
        bearer_token: &str,
        sample: &SensorSampleRequest,
    ) -> Result<SampleReceipt, GatewayError>;
}

/// HTTP client for the collector backend.
pub struct GatewayClient {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl GatewayClient {
    /// Create a new gateway client.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Check whether the backend host is reachable.
    pub async fn test_connection(&self) -> Result<bool, GatewayError> {
        let response = self
            .with_api_key(self.client.get(self.config.health_url()?))
            .send()
            .await?;
        // Any HTTP answer means the host is reachable; only 5xx counts as down
        Ok(!response.status().is_server_error())
    }

    fn with_api_key(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.header("apikey", key),
            None => builder,
        }
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: String,
        bearer_token: Option<&str>,
        body: &B,
        failure: &str,
    ) -> Result<reqwest::Response, GatewayError> {
        let mut request = self.with_api_key(self.client.post(url)).json(body);
        if let Some(token) = bearer_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("{failure} (HTTP {})", status.as_u16()));

        Err(GatewayError::Server {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl CollectorApi for GatewayClient {
    async fn verify_code(
        &self,
        code: &str,
        device_id: &str,
        device_type: &str,
    ) -> Result<AuthToken, GatewayError> {
        let request = VerifyCodeRequest {
            code: code.to_string(),
            device_id: device_id.to_string(),
            device_type: device_type.to_string(),
        };
        let response = self
            .post_json(
                self.config.verify_code_url(),
                None,
                &request,
                "Code verification failed",
            )
            .await?;
        let body: VerifyCodeResponse = response.json().await?;
        token_from_verification(body)
    }

    async fn start_session(
        &self,
        bearer_token: &str,
        device_type: &str,
    ) -> Result<StartedSession, GatewayError> {
        let request = StartSessionRequest {
            device_type: device_type.to_string(),
        };
        let response = self
            .post_json(
                self.config.start_session_url(),
                Some(bearer_token),
                &request,
                "Failed to start session",
            )
            .await?;
        let session: StartedSession = response.json().await?;
        if session.session_id.is_empty() {
            return Err(GatewayError::Rejected(
                "backend returned an empty session id".to_string(),
            ));
        }
        Ok(session)
    }

    async fn ingest_sample(
        &self,
        bearer_token: &str,
        sample: &SensorSampleRequest,
    ) -> Result<SampleReceipt, GatewayError> {
        let response = self
            .post_json(
                self.config.ingest_url(),
                Some(bearer_token),
                sample,
                "Sample upload failed",
            )
            .await?;
        let receipt: SampleReceipt = response.json().await?;
        if !receipt.success {
            return Err(GatewayError::Rejected(
                receipt
                    .message
                    .unwrap_or_else(|| "sample refused".to_string()),
            ));
        }
        Ok(receipt)
    }
}

fn token_from_verification(body: VerifyCodeResponse) -> Result<AuthToken, GatewayError> {
    if body.success == Some(false) {
        return Err(GatewayError::Rejected(
            body.message
                .unwrap_or_else(|| "Code verification failed".to_string()),
        ));
    }

    // A token without a user id would leave the device unpaired on restart
    let Some(user_id) = body.user_id.filter(|u| !u.is_empty()) else {
        return Err(GatewayError::Serialization(
            "verification response carried no user id".to_string(),
        ));
    };
    if let Some(jwt) = body.jwt.filter(|t| !t.is_empty()) {
        return Ok(AuthToken { jwt, user_id });
    }

    // Backends that only report success get a provisional token so the
    // device can still open a session.
    if body.success == Some(true) {
        tracing::warn!(user_id = %user_id, "verification returned no token, using provisional token");
        let jwt = format!("temp_token_{}_{}", Utc::now().timestamp_millis(), user_id);
        return Ok(AuthToken { jwt, user_id });
    }

    Err(GatewayError::Serialization(
        "verification response carried no token".to_string(),
    ))
}
