//! Remote backend boundary and its HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Operation, OperationKind};
use crate::util::{compact_text, is_http_url, normalize_text_option};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const VERSION_MISMATCH: &str = "version_mismatch";

/// Backend confirmation of an applied operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PushAck {
    /// Row version after the write, when the backend reports it
    #[serde(default)]
    pub version: Option<i64>,
}

/// Why a push did not land
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PushError {
    /// Connectivity failure; nothing reached the backend
    #[error("Backend unreachable: {0}")]
    Unreachable(String),
    /// Retryable server-side failure
    #[error("Transient backend error: {0}")]
    Transient(String),
    /// Remote row diverged from the operation's base version
    #[error("Version conflict (remote version {remote_version:?})")]
    Conflict {
        remote_version: Option<i64>,
        remote_payload: Option<serde_json::Value>,
    },
    /// The backend will never accept this operation
    #[error("Operation rejected: {0}")]
    Rejected(String),
    /// Credentials were refused; affects every operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl PushError {
    /// Connectivity-class errors move the runtime offline.
    pub const fn is_connectivity(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }

    /// Session-wide errors stop the batch and need a manual retry.
    pub const fn is_session_wide(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

/// Where operations are pushed.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    async fn push(&self, operation: &Operation) -> Result<PushAck, PushError>;
}

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    operation_id: String,
    kind: OperationKind,
    payload: &'a serde_json::Value,
    base_version: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    error: Option<String>,
    message: Option<String>,
    remote_version: Option<i64>,
    remote_payload: Option<serde_json::Value>,
}

/// `RemoteBackend` speaking JSON over HTTPS.
#[derive(Clone)]
pub struct HttpBackend {
    base_url: Url,
    token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpBackend")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> crate::Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|error| crate::Error::Config(format!("cannot build HTTP client: {error}")))?;
        Ok(Self {
            base_url,
            token: normalize_text_option(token),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn endpoint(&self, operation: &Operation) -> Result<Url, PushError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| PushError::Rejected(format!("cannot route to {}", self.base_url)))?
            .pop_if_empty()
            .extend(["v1", "sync", operation.entity.as_str(), operation.entity_id.as_str()]);
        Ok(url)
    }
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    async fn push(&self, operation: &Operation) -> Result<PushAck, PushError> {
        let url = self.endpoint(operation)?;
        let body = PushRequest {
            operation_id: operation.id.to_string(),
            kind: operation.kind,
            payload: &operation.payload,
            base_version: operation.base_version,
        };

        let mut request = self
            .client
            .post(url)
            .header("Accept", "application/json")
            .header("Idempotency-Key", operation.id.to_string())
            .json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(classify_transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(classify_transport_error)?;
        classify_response(status, &text)
    }
}

/// Map an HTTP response onto the push outcome taxonomy.
pub fn classify_response(status: StatusCode, body: &str) -> Result<PushAck, PushError> {
    if status.is_success() {
        if body.trim().is_empty() {
            return Ok(PushAck::default());
        }
        return Ok(serde_json::from_str::<PushAck>(body).unwrap_or_default());
    }

    let parsed = serde_json::from_str::<ErrorBody>(body).unwrap_or_default();
    if status == StatusCode::CONFLICT && parsed.code.as_deref() == Some(VERSION_MISMATCH) {
        return Err(PushError::Conflict {
            remote_version: parsed.remote_version,
            remote_payload: parsed.remote_payload,
        });
    }

    let message = error_message(status, &parsed, body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PushError::Unauthorized(message)),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_EARLY | StatusCode::TOO_MANY_REQUESTS => {
            Err(PushError::Transient(message))
        }
        status if status.is_server_error() => Err(PushError::Transient(message)),
        status if status.is_client_error() => Err(PushError::Rejected(message)),
        _ => Err(PushError::Transient(message)),
    }
}

fn classify_transport_error(error: reqwest::Error) -> PushError {
    if error.is_connect() || error.is_timeout() {
        PushError::Unreachable(error.to_string())
    } else {
        PushError::Transient(error.to_string())
    }
}

fn error_message(status: StatusCode, parsed: &ErrorBody, body: &str) -> String {
    if let Some(message) = parsed.message.as_ref().or(parsed.error.as_ref()) {
        return format!("{} ({})", message.trim(), status.as_u16());
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> crate::Result<Url> {
    let base = normalize_text_option(Some(raw))
        .ok_or_else(|| crate::Error::Config("backend URL must not be empty".to_string()))?;
    if !is_http_url(&base) {
        return Err(crate::Error::Config(
            "backend URL must include http:// or https://".to_string(),
        ));
    }
    Url::parse(base.trim_end_matches('/'))
        .map_err(|error| crate::Error::Config(format!("invalid backend URL: {error}")))
}
