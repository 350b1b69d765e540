//! HTTP calls against the queue-based face-swap service.

use assistant_protocol::assistant::Attachment;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{header::CONTENT_TYPE, multipart};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::state::{AsyncJobHandle, FileRef, PollOutcome};
use crate::{
    attachments::{decode_base64, normalize_image},
    routers::{
        error::GatewayError,
        sse::sse_data,
        upstream::{self, read_response_body_limited, ReadBodyResult},
    },
};

const PROVIDER: &str = "faceswap";

/// Cap on one poll response body (4 MB).
const MAX_POLL_BODY_SIZE: usize = 4 * 1024 * 1024;

/// A face-swap input, decoded and typed before any credits are taken.
#[derive(Clone)]
pub(crate) struct InputImage {
    bytes: Vec<u8>,
    mime_type: String,
    file_name: String,
}

impl InputImage {
    /// Decode one payload image. `role` names it in the error.
    pub fn decode(image: &Attachment, role: &str) -> Result<Self, GatewayError> {
        let bytes = decode_base64(&image.data)
            .map_err(|e| GatewayError::validation(format!("{role} image: {e}")))?;
        if bytes.is_empty() {
            return Err(GatewayError::validation(format!("{role} image is empty")));
        }
        let file_name = match image.file_name.trim() {
            "" => "image.png".to_string(),
            name => name.to_string(),
        };
        Ok(Self {
            bytes,
            mime_type: normalize_image(image).mime_type,
            file_name,
        })
    }
}

pub(crate) struct QueueClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl QueueClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn file_url(&self, path: &str) -> String {
        format!("{}/gradio_api/file={path}", self.base_url)
    }

    pub fn poll_url(&self, handle: &AsyncJobHandle) -> String {
        format!(
            "{}/gradio_api/queue/data?session_hash={}",
            self.base_url, handle.session_hash
        )
    }

    /// Upload one image and return the service's reference to it.
    pub async fn upload(&self, image: &InputImage) -> Result<FileRef, GatewayError> {
        let size = image.bytes.len();
        let mime_type = image.mime_type.clone();
        let file_name = image.file_name.clone();

        let part = multipart::Part::bytes(image.bytes.clone())
            .file_name(file_name.clone())
            .mime_str(&mime_type)
            .map_err(|e| GatewayError::validation(format!("invalid MIME type {mime_type}: {e}")))?;
        let form = multipart::Form::new().part("files", part);

        let builder = self.authorize(
            self.http
                .post(format!("{}/gradio_api/upload", self.base_url))
                .multipart(form),
        );
        let paths: Vec<String> = upstream::execute_json(builder, PROVIDER).await?;
        let path = paths
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::upstream("faceswap upload returned no file path"))?;

        debug!(path = %path, size, "Uploaded face-swap input");
        Ok(FileRef {
            url: self.file_url(&path),
            path,
            orig_name: file_name,
            mime_type,
            size,
        })
    }

    /// Join the processing queue with both uploaded files.
    pub async fn join(&self, handle: &AsyncJobHandle, fn_index: u32) -> Result<(), GatewayError> {
        let body = json!({
            "data": handle.uploaded.iter().map(FileRef::to_file_data).collect::<Vec<_>>(),
            "fn_index": fn_index,
            "session_hash": handle.session_hash,
            "trigger_id": null,
            "event_data": null,
        });
        let builder = self.authorize(
            self.http
                .post(format!("{}/gradio_api/queue/join", self.base_url))
                .json(&body),
        );
        let response = upstream::send(builder, PROVIDER).await?;
        upstream::ensure_success(response, PROVIDER).await?;
        Ok(())
    }

    /// One fetch of the event endpoint. Any non-success status is fatal.
    pub async fn poll(&self, handle: &AsyncJobHandle) -> Result<PollOutcome, GatewayError> {
        let builder = self.authorize(self.http.get(self.poll_url(handle)));
        let response = upstream::send(builder, PROVIDER).await?;
        let response = upstream::ensure_success(response, PROVIDER).await?;

        let body = match read_response_body_limited(response, MAX_POLL_BODY_SIZE).await {
            ReadBodyResult::Ok(body) => body,
            ReadBodyResult::TooLarge => {
                return Err(GatewayError::upstream("faceswap event stream too large"))
            }
            ReadBodyResult::Error(e) => {
                return Err(GatewayError::upstream(format!(
                    "Failed to read faceswap events: {e}"
                )))
            }
        };
        Ok(self.scan_events(&body))
    }

    /// Look through every record of a poll response for the completion marker.
    pub(crate) fn scan_events(&self, body: &str) -> PollOutcome {
        for line in body.lines() {
            let Some(data) = sse_data(line.trim_end_matches('\r')) else {
                continue;
            };
            let Ok(event) = serde_json::from_str::<Value>(data) else {
                warn!(line = %data, "Skipping unparsable queue event");
                continue;
            };
            if event.get("msg").and_then(Value::as_str) != Some("process_completed") {
                continue;
            }

            if event.get("success").and_then(Value::as_bool) == Some(false) {
                let message = event
                    .pointer("/output/error")
                    .and_then(Value::as_str)
                    .filter(|m| !m.is_empty())
                    .unwrap_or("Face swap job failed")
                    .to_string();
                return PollOutcome::Failed { message };
            }

            return match event.pointer("/output/data/0").and_then(|v| self.result_url(v)) {
                Some(result_url) => PollOutcome::Completed { result_url },
                None => PollOutcome::Failed {
                    message: "Face swap completed without a result file".to_string(),
                },
            };
        }
        PollOutcome::Pending
    }

    fn result_url(&self, value: &Value) -> Option<String> {
        match value {
            Value::String(s) if s.starts_with("http://") || s.starts_with("https://") => {
                Some(s.clone())
            }
            Value::String(path) if !path.is_empty() => Some(self.file_url(path)),
            Value::Object(obj) => {
                if let Some(url) = obj.get("url").and_then(Value::as_str).filter(|u| !u.is_empty()) {
                    return Some(url.to_string());
                }
                if let Some(path) = obj.get("path").and_then(Value::as_str).filter(|p| !p.is_empty()) {
                    return Some(self.file_url(path));
                }
                obj.get("value").and_then(|v| self.result_url(v))
            }
            _ => None,
        }
    }

    /// Download the result file as an attachment named `swapped_result.<ext>`.
    pub async fn download(&self, url: &str) -> Result<Attachment, GatewayError> {
        let builder = self.authorize(self.http.get(url));
        let response = upstream::send(builder, PROVIDER).await?;
        let response = upstream::ensure_success(response, PROVIDER).await?;

        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or_default().trim().to_ascii_lowercase())
            .filter(|v| v.starts_with("image/"))
            .unwrap_or_else(|| "image/png".to_string());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| GatewayError::upstream(format!("Failed to download face-swap result: {e}")))?;

        Ok(Attachment::new(
            STANDARD.encode(&bytes),
            mime_type.clone(),
            format!("swapped_result.{}", extension_for(&mime_type)),
        ))
    }
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}
