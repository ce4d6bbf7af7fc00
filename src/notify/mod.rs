//! Progress notifications pushed to the client fan-out
//!
//! The scheduler emits an [`ImageProgressEvent`] at every lifecycle step of a
//! job. Delivery to browsers (WebSocket, SSE) belongs to the push
//! collaborator, which subscribes to a [`BroadcastNotifier`].

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::queue::job::Job;

/// Longest prompt excerpt carried in an event
pub const PROMPT_PREVIEW_CHARS: usize = 100;

const DEFAULT_CAPACITY: usize = 1024;

/// Lifecycle status reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Complete,
    Error,
    Cancelled,
}

/// `image_progress` message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageProgressEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub job_id: String,
    pub conversation_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub queue_position: u32,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl ImageProgressEvent {
    /// Event describing `job` in the given status
    pub fn for_job(job: &Job, status: JobStatus) -> Self {
        Self {
            event_type: "image_progress".to_string(),
            job_id: job.id.clone(),
            conversation_id: job.conversation_ref.clone(),
            status,
            progress: job.progress,
            queue_position: job.queue_position,
            prompt: truncate_prompt(&job.prompt),
            image_url: None,
            error: None,
            estimated_seconds: None,
            message_id: Some(job.message_ref.clone()),
        }
    }

    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_estimate(mut self, seconds: u64) -> Self {
        self.estimated_seconds = Some(seconds);
        self
    }
}

/// Truncate on a character boundary
pub fn truncate_prompt(prompt: &str) -> String {
    prompt.chars().take(PROMPT_PREVIEW_CHARS).collect()
}

/// Outbound notification channel
pub trait ProgressNotifier: Send + Sync {
    /// Emit an event. Must not block and must not fail the caller.
    fn notify(&self, event: ImageProgressEvent);
}

/// In-process fan-out over a `tokio::sync::broadcast` channel
pub struct BroadcastNotifier {
    sender: broadcast::Sender<ImageProgressEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ImageProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ProgressNotifier for BroadcastNotifier {
    fn notify(&self, event: ImageProgressEvent) {
        // A send error only means nobody is listening.
        let _ = self.sender.send(event);
    }
}
