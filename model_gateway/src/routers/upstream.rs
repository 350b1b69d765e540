//! Outbound request helpers shared by every provider adapter
//!
//! Transport failures, non-success statuses and undecodable bodies are all
//! mapped onto `GatewayError` here so the adapters only deal with payloads.

use futures::StreamExt;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::error::{sanitize_error_body, upstream_error_message, GatewayError};
use crate::observability::metrics::Metrics;

/// Cap on error bodies read from an upstream (1 MB).
pub(crate) const MAX_ERROR_RESPONSE_SIZE: usize = 1024 * 1024;

/// Result of reading a response body with size limit
pub(crate) enum ReadBodyResult {
    Ok(String),
    TooLarge,
    Error(String),
}

/// Read a response body incrementally with a size limit.
pub(crate) async fn read_response_body_limited(
    response: Response,
    max_size: usize,
) -> ReadBodyResult {
    let mut stream = response.bytes_stream();
    let mut buf: Vec<u8> = Vec::new();

    while let Some(chunk_result) = stream.next().await {
        match chunk_result {
            Ok(chunk) => {
                if buf.len() + chunk.len() > max_size {
                    return ReadBodyResult::TooLarge;
                }
                buf.extend_from_slice(&chunk);
            }
            Err(e) => return ReadBodyResult::Error(e.to_string()),
        }
    }

    ReadBodyResult::Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Send a prepared request, mapping transport failures to `UpstreamError`.
pub(crate) async fn send(
    builder: RequestBuilder,
    provider: &'static str,
) -> Result<Response, GatewayError> {
    match builder.send().await {
        Ok(response) => {
            debug!(provider, status = %response.status(), "Received upstream response");
            Ok(response)
        }
        Err(e) => {
            warn!(provider, error = %e, "Upstream request failed");
            let kind = if e.is_timeout() {
                "timeout"
            } else if e.is_connect() {
                "connect"
            } else {
                "request"
            };
            Metrics::record_upstream_error(provider, kind);

            let message = if e.is_timeout() {
                format!("{provider} request timed out")
            } else if e.is_connect() {
                format!("Could not connect to {provider}")
            } else {
                format!("{provider} request failed: {e}")
            };
            Err(GatewayError::upstream(message))
        }
    }
}

/// Pass a successful response through; turn anything else into an error
/// carrying the upstream's sanitized message.
pub(crate) async fn ensure_success(
    response: Response,
    provider: &'static str,
) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    Metrics::record_upstream_error(provider, status.as_str());
    let body = match read_response_body_limited(response, MAX_ERROR_RESPONSE_SIZE).await {
        ReadBodyResult::Ok(body) => sanitize_error_body(&body),
        ReadBodyResult::TooLarge => String::from("error body too large"),
        ReadBodyResult::Error(e) => format!("failed to read error body: {e}"),
    };
    warn!(provider, status = %status, body = %body, "Upstream returned an error");

    Err(classify_failure(provider, status, &body))
}

fn classify_failure(provider: &str, status: StatusCode, body: &str) -> GatewayError {
    let message = upstream_error_message(body);

    let policy_violation = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| {
            json.pointer("/error/code")
                .and_then(Value::as_str)
                .map(|code| code == "content_policy_violation")
        })
        .unwrap_or(false);
    if policy_violation {
        return GatewayError::ContentBlocked(message);
    }

    GatewayError::upstream(format!("{provider} returned {}: {message}", status.as_u16()))
}

/// Decode a successful JSON body.
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: Response,
    provider: &'static str,
) -> Result<T, GatewayError> {
    let bytes = response.bytes().await.map_err(|e| {
        Metrics::record_upstream_error(provider, "body");
        GatewayError::upstream(format!("Failed to read {provider} response: {e}"))
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        Metrics::record_upstream_error(provider, "decode");
        GatewayError::upstream(format!("Invalid {provider} response: {e}"))
    })
}

/// `send` + `ensure_success` + `read_json` for one-shot calls.
pub(crate) async fn execute_json<T: DeserializeOwned>(
    builder: RequestBuilder,
    provider: &'static str,
) -> Result<T, GatewayError> {
    let response = send(builder, provider).await?;
    let response = ensure_success(response, provider).await?;
    read_json(response, provider).await
}
