//! SSE infrastructure shared by the chat adapters and the face-swap poller
//!
//! Provides the split-tolerant line decoder used on upstream byte streams,
//! the client-facing `event: <json>` frame format, and the streaming
//! response builder.

use std::io;

use assistant_protocol::assistant::StreamEvent;
use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::error;

use super::error::GatewayError;

// ============================================================================
// Constants
// ============================================================================

/// Maximum bytes buffered without a line terminator before the upstream
/// stream is considered malformed (1 MB).
pub(crate) const MAX_SSE_BUFFER_SIZE: usize = 1024 * 1024;

/// Channel buffer size for events sent to the client.
pub(crate) const SSE_CHANNEL_SIZE: usize = 128;

// ============================================================================
// Line decoding
// ============================================================================

/// Reassembles newline-terminated lines from arbitrarily split byte chunks.
///
/// Bytes are kept raw until a full line is available, so a multi-byte UTF-8
/// sequence split across two reads decodes correctly.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, without the
    /// trailing `\n` / `\r\n`.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, GatewayError> {
        // The retained tail holds no newline, so only new bytes are scanned.
        let mut search_from = self.buf.len();
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buf[search_from..].iter().position(|b| *b == b'\n') {
            let end = search_from + offset;
            lines.push(decode_line(&self.buf[start..end]));
            start = end + 1;
            search_from = start;
        }
        self.buf.drain(..start);

        if self.buf.len() > MAX_SSE_BUFFER_SIZE {
            return Err(GatewayError::upstream(format!(
                "Upstream stream exceeded {MAX_SSE_BUFFER_SIZE} bytes without a line break"
            )));
        }
        Ok(lines)
    }

    /// Take whatever remains once the upstream closed without a final newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let line = decode_line(&self.buf);
        self.buf.clear();
        Some(line)
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Payload of an SSE `data:` line; other fields and comments yield `None`.
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

// ============================================================================
// Client-facing frames
// ============================================================================

/// Format one normalized event as `event: <json>\n\n`.
pub(crate) fn format_event(event: &StreamEvent) -> Bytes {
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Bytes::from(format!("event: {json}\n\n"))
}

/// Format and send an event through the channel.
///
/// Returns `true` if the send succeeded, `false` if the receiver was dropped.
pub(crate) async fn send_event(
    tx: &mpsc::Sender<Result<Bytes, io::Error>>,
    event: &StreamEvent,
) -> bool {
    tx.send(Ok(format_event(event))).await.is_ok()
}

/// Build the streaming response around a body fed by a pump task.
pub(crate) fn build_sse_response(body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(body)
        .unwrap_or_else(|e| {
            error!("Failed to build streaming response: {}", e);
            GatewayError::internal("Failed to build response").into_response()
        })
}
