//! Single state machine driver for the face-swap job.
//!
//! One function, one loop, one match. Dispatches the step for `job.state`
//! and stops at the first terminal result.

use assistant_protocol::assistant::Attachment;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    client::{InputImage, QueueClient},
    state::{AsyncJobHandle, JobState, PollOutcome, StepResult},
    Pause,
};
use crate::{
    config::FaceSwapConfig,
    observability::metrics::{metrics_labels, Metrics},
    routers::error::GatewayError,
};

pub(crate) struct FaceSwapJob<'a> {
    pub client: &'a QueueClient,
    pub pause: &'a dyn Pause,
    pub cancel: CancellationToken,
    pub config: &'a FaceSwapConfig,
    pub source: &'a InputImage,
    pub target: &'a InputImage,
    pub state: JobState,
    pub handle: AsyncJobHandle,
}

impl<'a> FaceSwapJob<'a> {
    pub fn new(
        client: &'a QueueClient,
        pause: &'a dyn Pause,
        cancel: CancellationToken,
        config: &'a FaceSwapConfig,
        source: &'a InputImage,
        target: &'a InputImage,
    ) -> Self {
        Self {
            client,
            pause,
            cancel,
            config,
            source,
            target,
            state: JobState::Uploading,
            handle: AsyncJobHandle::new(config.max_attempts),
        }
    }
}

/// Run the job to a terminal state.
pub(crate) async fn execute(job: &mut FaceSwapJob<'_>) -> Result<Attachment, GatewayError> {
    loop {
        let result = match job.state.clone() {
            JobState::Uploading => upload(job).await,

            JobState::Queued => join_queue(job).await,

            JobState::Polling => poll_once(job).await,

            JobState::Completed { result_url } => download(job, &result_url).await,

            JobState::TimedOut => {
                Metrics::record_job_outcome(metrics_labels::JOB_TIMED_OUT);
                Err(GatewayError::PollingTimeout(format!(
                    "Face swap polling timed out after {} attempts",
                    job.handle.attempts
                )))
            }

            JobState::Failed { message } => {
                Metrics::record_job_outcome(metrics_labels::JOB_FAILED);
                Err(GatewayError::JobFailed(message))
            }
        };

        match result? {
            StepResult::Continue => continue,
            StepResult::Done(attachment) => return Ok(attachment),
        }
    }
}

async fn upload(job: &mut FaceSwapJob<'_>) -> Result<StepResult, GatewayError> {
    let source = job.client.upload(job.source).await?;
    let target = job.client.upload(job.target).await?;
    job.handle.uploaded = vec![source, target];
    job.state = JobState::Queued;
    Ok(StepResult::Continue)
}

async fn join_queue(job: &mut FaceSwapJob<'_>) -> Result<StepResult, GatewayError> {
    job.client.join(&job.handle, job.config.fn_index).await?;
    info!(session = %job.handle.session_hash, "Face swap job queued");
    job.state = JobState::Polling;
    Ok(StepResult::Continue)
}

/// One fetch, then either a terminal transition or a pause before the next.
async fn poll_once(job: &mut FaceSwapJob<'_>) -> Result<StepResult, GatewayError> {
    if job.cancel.is_cancelled() {
        return Err(cancelled());
    }

    job.handle.attempts += 1;
    Metrics::record_poll_attempt();
    let outcome = job.client.poll(&job.handle).await?;
    debug!(
        session = %job.handle.session_hash,
        attempt = job.handle.attempts,
        ?outcome,
        "Polled face swap queue"
    );

    match outcome {
        PollOutcome::Completed { result_url } => {
            job.state = JobState::Completed { result_url };
        }
        PollOutcome::Failed { message } => {
            warn!(session = %job.handle.session_hash, %message, "Face swap job failed");
            job.state = JobState::Failed { message };
        }
        PollOutcome::Pending if job.handle.budget_exhausted() => {
            warn!(
                session = %job.handle.session_hash,
                attempts = job.handle.attempts,
                "Face swap polling budget exhausted"
            );
            job.state = JobState::TimedOut;
        }
        PollOutcome::Pending => {
            tokio::select! {
                _ = job.cancel.cancelled() => return Err(cancelled()),
                _ = job.pause.pause(job.config.poll_interval) => {}
            }
        }
    }
    Ok(StepResult::Continue)
}

async fn download(job: &mut FaceSwapJob<'_>, url: &str) -> Result<StepResult, GatewayError> {
    let attachment = job.client.download(url).await?;
    Metrics::record_job_outcome(metrics_labels::JOB_COMPLETED);
    info!(
        session = %job.handle.session_hash,
        attempts = job.handle.attempts,
        "Face swap job completed"
    );
    Ok(StepResult::Done(attachment))
}

fn cancelled() -> GatewayError {
    Metrics::record_job_outcome(metrics_labels::JOB_CANCELLED);
    GatewayError::internal("Face swap job was cancelled")
}
