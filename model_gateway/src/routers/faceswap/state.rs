//! State machine types for the face-swap job.

use assistant_protocol::assistant::Attachment;
use rand::{distr::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Job lifecycle.
///
/// `Uploading -> Queued -> Polling -> {Completed | TimedOut | Failed}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JobState {
    // ── Submission ──────────────────────────────────────────────
    /// Entry state: both input images are uploaded.
    Uploading,
    /// Both file references exist; the job is joined to the queue.
    Queued,

    // ── Waiting ─────────────────────────────────────────────────
    /// Fetching queue events on a fixed interval.
    Polling,

    // ── Terminal ────────────────────────────────────────────────
    /// The worker finished; the result still has to be downloaded.
    Completed { result_url: String },
    /// The attempt budget ran out without a terminal event.
    TimedOut,
    /// The worker reported failure.
    Failed { message: String },
}

/// The result of executing a single step.
pub(crate) enum StepResult {
    /// The step updated the job state. The driver should continue the loop.
    Continue,
    /// Terminal: the swapped image.
    Done(Attachment),
}

/// An uploaded file as the queue service refers to it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub(crate) struct FileRef {
    pub path: String,
    pub url: String,
    pub orig_name: String,
    pub mime_type: String,
    pub size: usize,
}

impl FileRef {
    /// The `FileData` shape the queue expects in `data`.
    pub fn to_file_data(&self) -> Value {
        json!({
            "path": self.path,
            "url": self.url,
            "orig_name": self.orig_name,
            "mime_type": self.mime_type,
            "size": self.size,
            "meta": {"_type": "gradio.FileData"}
        })
    }
}

/// Everything the poll loop mutates for one job.
#[derive(Debug, Clone)]
pub(crate) struct AsyncJobHandle {
    pub session_hash: String,
    pub uploaded: Vec<FileRef>,
    pub attempts: u32,
    pub max_attempts: u32,
}

impl AsyncJobHandle {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            session_hash: new_session_hash(),
            uploaded: Vec::with_capacity(2),
            attempts: 0,
            max_attempts,
        }
    }

    pub fn budget_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

fn new_session_hash() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(11)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// What one poll fetch found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PollOutcome {
    Pending,
    Completed { result_url: String },
    Failed { message: String },
}
