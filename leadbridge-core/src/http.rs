//! Backend HTTP client with the authentication interceptor.
//!
//! Every authenticated request is stamped with the current session bearer
//! token just before it is sent. The token is read from a [`TokenProvider`]
//! each time, so nothing stale is ever cached here.
//!
//! # Refresh protocol
//!
//! ```text
//! SENDING -> success                          -> DONE
//!         -> 401 -> REFRESHING -> RETRY-ONCE  -> DONE | FAILED
//! ```
//!
//! - A 401 on a request that has not been retried marks it retried and
//!   exchanges the stored refresh token for a new access token.
//! - On refresh success the new token is persisted and the rejected request
//!   is replayed exactly once. Whatever the replay returns is final.
//! - On refresh failure, or with no refresh token, the CRM credential, the
//!   session pair and the user profile are cleared and the caller receives
//!   [`ApiError::AuthExpired`].
//! - A request already carrying the retry marker that receives a 401 fails
//!   immediately with [`ApiError::AuthExpired`].
//!
//! Any other error passes through unmodified.

use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::ClientConfig;
use crate::store::{Secret, StoreError, TokenProvider};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Errors raised by the HTTP layer.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The session is no longer valid and could not be renewed.
    #[error("authentication expired: {message}")]
    AuthExpired { message: String },

    /// Transport failure.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-success status other than a handled 401.
    #[error("{message}")]
    Status { status: u16, message: String },

    /// A request or response body could not be (de)serialized.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// An endpoint path could not be resolved against the base URL.
    #[error("invalid URL: {message}")]
    InvalidUrl { message: String },

    /// Persisting a refreshed token failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ApiError {
    fn auth_expired(message: impl Into<String>) -> Self {
        Self::AuthExpired {
            message: message.into(),
        }
    }

    /// HTTP status if this is a status error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// One outbound backend call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: Option<Value>,
    authenticated: bool,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            authenticated: true,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Attach a JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body).map_err(|e| ApiError::Serialization {
            message: format!("failed to encode request body: {}", e),
        })?;
        self.body = Some(value);
        Ok(self)
    }

    /// Send without a bearer token and without the refresh protocol; a 401
    /// is returned to the caller as a plain status error.
    pub fn unauthenticated(mut self) -> Self {
        self.authenticated = false;
        self
    }

    /// Mark the request as already retried.
    pub fn mark_retried(mut self) -> Self {
        self.retried = true;
        self
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> &Method {
        &self.method
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    token: Option<String>,
}

/// HTTP client for every backend call.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    refresh_path: String,
    tokens: Arc<dyn TokenProvider>,
}

impl ApiClient {
    /// Create a client for `base_url` with the default timeout.
    pub fn new(base_url: &str, tokens: Arc<dyn TokenProvider>) -> Result<Self, ApiError> {
        let mut raw = base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base_url = Url::parse(&raw).map_err(|e| ApiError::InvalidUrl {
            message: format!("{}: {}", base_url, e),
        })?;
        Ok(Self {
            http: build_http_client(Duration::from_secs(DEFAULT_TIMEOUT_SECS))?,
            base_url,
            refresh_path: crate::config::Endpoints::default().refresh_token,
            tokens,
        })
    }

    /// Create a client from configuration.
    pub fn from_config(
        config: &ClientConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, ApiError> {
        let base_url = config.parsed_base_url().map_err(|e| ApiError::InvalidUrl {
            message: e.to_string(),
        })?;
        Ok(Self {
            http: build_http_client(config.request_timeout())?,
            base_url,
            refresh_path: config.endpoints.refresh_token.clone(),
            tokens,
        })
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ApiError> {
        self.http = build_http_client(timeout)?;
        Ok(self)
    }

    /// Set the refresh-token endpoint path.
    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Execute a request, applying the refresh protocol, and return the
    /// decoded JSON body (`Null` for an empty body).
    pub async fn execute(&self, request: ApiRequest) -> Result<Value, ApiError> {
        let response = self.transmit(&request).await?;

        if response.status() != StatusCode::UNAUTHORIZED || !request.authenticated {
            return Self::read_body(response).await;
        }

        if request.retried {
            tracing::warn!(
                "{} {} rejected after retry, not retrying again",
                request.method,
                request.path
            );
            return Err(ApiError::auth_expired(
                "request was rejected again after a token refresh",
            ));
        }

        let request = request.mark_retried();
        self.refresh_session().await?;

        tracing::debug!(
            "Replaying {} {} with refreshed token",
            request.method,
            request.path
        );
        let replay = self.transmit(&request).await?;
        if replay.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(
                "{} {} rejected after retry, not retrying again",
                request.method,
                request.path
            );
            return Err(ApiError::auth_expired(
                "request was rejected again after a token refresh",
            ));
        }
        Self::read_body(replay).await
    }

    /// Execute a request and decode the body into `T`.
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
    ) -> Result<T, ApiError> {
        let path = request.path.clone();
        let body = self.execute(request).await?;
        serde_json::from_value(body).map_err(|e| ApiError::Serialization {
            message: format!("unexpected response from {}: {}", path, e),
        })
    }

    fn resolve(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::InvalidUrl {
                message: format!("{}: {}", path, e),
            })
    }

    async fn transmit(&self, request: &ApiRequest) -> Result<reqwest::Response, ApiError> {
        let url = self.resolve(&request.path)?;
        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .header(ACCEPT, "application/json");

        if request.authenticated {
            if let Some(token) = self.tokens.bearer_token() {
                builder = builder.header(AUTHORIZATION, format!("Bearer {}", token.expose()));
            }
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        Ok(builder.send().await?)
    }

    /// Exchange the stored refresh token for a new access token.
    async fn refresh_session(&self) -> Result<(), ApiError> {
        let Some(refresh_token) = self.tokens.refresh_token() else {
            tracing::info!("Session rejected and no refresh token available");
            self.invalidate_session();
            return Err(ApiError::auth_expired("no refresh token available"));
        };

        match self.request_refresh(&refresh_token).await {
            Ok(access_token) => {
                self.tokens.store_refreshed(&access_token)?;
                tracing::info!("Successfully refreshed session token");
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to refresh session token: {}", e);
                self.invalidate_session();
                Err(ApiError::auth_expired(format!("token refresh failed: {}", e)))
            }
        }
    }

    async fn request_refresh(&self, refresh_token: &Secret) -> Result<Secret, ApiError> {
        let request = ApiRequest::post(self.refresh_path.clone())
            .unauthenticated()
            .json(&RefreshRequest {
                refresh_token: refresh_token.expose(),
            })?;
        // Sent directly rather than through `execute` so a rejected refresh
        // can never re-enter the refresh protocol.
        let body = Self::read_body(self.transmit(&request).await?).await?;
        let response: RefreshResponse =
            serde_json::from_value(body).map_err(|e| ApiError::Serialization {
                message: format!("unexpected refresh response: {}", e),
            })?;

        match response.token.filter(|t| !t.is_empty()) {
            Some(token) => Ok(Secret::new(token)),
            None => Err(ApiError::Serialization {
                message: "refresh response did not contain a token".to_string(),
            }),
        }
    }

    fn invalidate_session(&self) {
        if let Err(e) = self.tokens.invalidate_crm_session() {
            tracing::warn!("Failed to clear expired session: {}", e);
        }
    }

    async fn read_body(response: reqwest::Response) -> Result<Value, ApiError> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: error_message(status, &text),
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ApiError::Serialization {
            message: format!("invalid JSON response: {}", e),
        })
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

fn build_http_client(timeout: Duration) -> Result<reqwest::Client, ApiError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Pull the backend's own message out of an error body, verbatim.
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        for field in ["error", "message"] {
            if let Some(message) = value.get(field).and_then(Value::as_str) {
                if !message.is_empty() {
                    return message.to_string();
                }
            }
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return format!(
            "request failed with status {}",
            status.canonical_reason().unwrap_or(status.as_str())
        );
    }
    trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect()
}
