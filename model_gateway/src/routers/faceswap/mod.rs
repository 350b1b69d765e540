//! Face-swap workflow against a queue-based worker
//!
//! Uploads both images, joins the worker's queue under a fresh session and
//! polls its event endpoint on a fixed interval until a completion event, a
//! failure, or the attempt budget runs out. The result file is downloaded
//! and returned as an attachment.

mod client;
mod driver;
mod state;

use std::time::Duration;

use assistant_protocol::assistant::{Attachment, FaceSwapPayload};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub(crate) use client::{InputImage, QueueClient};
use driver::FaceSwapJob;

use super::error::GatewayError;
use crate::config::FaceSwapConfig;

/// Wait between poll attempts.
#[async_trait]
pub trait Pause: Send + Sync {
    async fn pause(&self, duration: Duration);
}

/// Non-blocking sleep on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioPause;

#[async_trait]
impl Pause for TokioPause {
    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A face-swap request that passed every local check: the service is
/// configured and both images decode.
pub struct PreparedFaceSwap {
    base_url: String,
    source: InputImage,
    target: InputImage,
}

impl PreparedFaceSwap {
    pub fn new(config: &FaceSwapConfig, payload: &FaceSwapPayload) -> Result<Self, GatewayError> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| GatewayError::configuration("Face swap service is not configured"))?;
        Ok(Self {
            base_url: base_url.to_string(),
            source: InputImage::decode(&payload.source_image, "source")?,
            target: InputImage::decode(&payload.target_image, "target")?,
        })
    }
}

/// Run one face-swap job.
///
/// `cancel` stops polling early; the handler drops a guard on it when the
/// client disconnects or the request times out.
pub async fn run_face_swap(
    http: &reqwest::Client,
    config: &FaceSwapConfig,
    pause: &dyn Pause,
    cancel: CancellationToken,
    request: &PreparedFaceSwap,
) -> Result<Attachment, GatewayError> {
    let client = QueueClient::new(http.clone(), request.base_url.as_str(), config.api_token.clone());

    let mut job = FaceSwapJob::new(
        &client,
        pause,
        cancel,
        config,
        &request.source,
        &request.target,
    );
    driver::execute(&mut job).await
}
