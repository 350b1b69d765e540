use assistant_protocol::{assistant::ErrorBody, validated::ERROR_CODE_HEADER};
use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use data_connector::StorageError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

pub const HEADER_X_ASSISTANT_ERROR_CODE: &str = ERROR_CODE_HEADER;

/// Every failure the gateway reports to a caller.
///
/// Per-attachment extraction failures never surface here; they become
/// placeholder text blocks and the request proceeds.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    /// Missing credentials or an unconfigured upstream. Never retried.
    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    CapabilityDenied(String),

    /// The provider refused the prompt or the output on safety grounds.
    #[error("{0}")]
    ContentBlocked(String),

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    PollingTimeout(String),

    /// The face-swap worker reported that the job itself failed.
    #[error("{0}")]
    JobFailed(String),

    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self::CapabilityDenied(message.into())
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Category name carried in the body's `error` field and the error header.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::Validation(_) => "ValidationError",
            Self::CapabilityDenied(_) => "CapabilityDenied",
            Self::ContentBlocked(_) => "ContentBlocked",
            Self::Upstream(_) => "UpstreamError",
            Self::PollingTimeout(_) => "PollingTimeout",
            Self::JobFailed(_) => "JobFailed",
            Self::Internal(_) => "InternalError",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::CapabilityDenied(_) => StatusCode::FORBIDDEN,
            Self::Validation(_) | Self::ContentBlocked(_) => StatusCode::BAD_REQUEST,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream(_) | Self::PollingTimeout(_) | Self::JobFailed(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<StorageError> for GatewayError {
    fn from(e: StorageError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<validator::ValidationErrors> for GatewayError {
    fn from(e: validator::ValidationErrors) -> Self {
        Self::Validation(e.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        create_error(self.status_code(), self.category(), self.to_string())
    }
}

pub fn create_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
) -> Response {
    let code_str = code.into();

    let mut headers = HeaderMap::with_capacity(1);
    if let Ok(val) = HeaderValue::from_str(&code_str) {
        headers.insert(HEADER_X_ASSISTANT_ERROR_CODE, val);
    }

    (status, headers, Json(ErrorBody::new(code_str, message))).into_response()
}

pub fn extract_error_code_from_response<B>(response: &Response<B>) -> &str {
    response
        .headers()
        .get(HEADER_X_ASSISTANT_ERROR_CODE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

static ORG_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s*\borganization org-\S+").unwrap());
static PROJ_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s*\bproject proj_\S+").unwrap());
static API_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(sk-[A-Za-z0-9_\-]{8,}|AIza[0-9A-Za-z_\-]{20,})").unwrap());

fn scrub(message: &str) -> String {
    let sanitized = ORG_ID_RE.replace_all(message, "");
    let sanitized = PROJ_ID_RE.replace_all(&sanitized, "");
    API_KEY_RE.replace_all(&sanitized, "[redacted]").into_owned()
}

/// Sanitize upstream error response bodies to prevent leaking internal identifiers.
/// - Strips org-ID patterns (`org-xxx`)
/// - Strips project-ID patterns (`proj_xxx`)
/// - Redacts anything shaped like a provider API key
/// - Non-JSON bodies are scrubbed as plain text
pub fn sanitize_error_body(body: &str) -> String {
    let mut json: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return scrub(body),
    };

    let mut modified = false;

    if let Some(error) = json.get_mut("error").and_then(Value::as_object_mut) {
        if let Some(Value::String(msg)) = error.get("message") {
            let sanitized = scrub(msg);
            if sanitized != *msg {
                error.insert("message".into(), Value::String(sanitized));
                modified = true;
            }
        }
    }

    if modified {
        serde_json::to_string(&json).unwrap_or_else(|_| body.to_string())
    } else {
        body.to_string()
    }
}

/// Pull the human-readable message out of an upstream error body.
///
/// Understands `{"error": {"message"}}` (OpenAI and Google), `{"error": "..."}`
/// and `{"message"}`; anything else is returned trimmed and truncated.
pub fn upstream_error_message(body: &str) -> String {
    const MAX_PREVIEW_CHARS: usize = 500;

    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let message = json
            .pointer("/error/message")
            .or_else(|| json.get("error").filter(|v| v.is_string()))
            .or_else(|| json.get("message"))
            .and_then(Value::as_str);
        if let Some(message) = message {
            return message.to_string();
        }
    }
    body.trim().chars().take(MAX_PREVIEW_CHARS).collect()
}
