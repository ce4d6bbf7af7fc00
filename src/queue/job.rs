//! Image jobs, their outcomes, and the completion interface

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Submission parameters for an image job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub owner: String,
    pub prompt: String,
    pub conversation_id: String,
    pub message_id: String,
    /// Caller-assigned id; generated when absent
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub checkpoint: Option<String>,
}

/// Why a placeholder was returned instead of a real image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderKind {
    Error,
    Timeout,
    Maintenance,
}

impl fmt::Display for PlaceholderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaceholderKind::Error => f.write_str("error"),
            PlaceholderKind::Timeout => f.write_str("timeout"),
            PlaceholderKind::Maintenance => f.write_str("maintenance"),
        }
    }
}

/// Terminal result of a generation. Callers always get an image reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationOutcome {
    Image {
        url: String,
    },
    Placeholder {
        reason: PlaceholderKind,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl GenerationOutcome {
    pub fn image_url(&self) -> &str {
        match self {
            GenerationOutcome::Image { url } => url,
            GenerationOutcome::Placeholder { url, .. } => url,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, GenerationOutcome::Image { .. })
    }

    pub fn error(&self) -> Option<String> {
        match self {
            GenerationOutcome::Image { .. } => None,
            GenerationOutcome::Placeholder { reason, error, .. } => {
                Some(error.clone().unwrap_or_else(|| reason.to_string()))
            }
        }
    }
}

/// Receives the final outcome of a job, at most once.
///
/// Cancelled jobs never reach their handler.
#[async_trait]
pub trait CompletionHandler: Send + Sync {
    async fn on_complete(&self, job_id: &str, outcome: &GenerationOutcome) -> anyhow::Result<()>;
}

/// Adapter for synchronous closures
pub struct FnCompletion<F>(pub F);

#[async_trait]
impl<F> CompletionHandler for FnCompletion<F>
where
    F: Fn(&str, &GenerationOutcome) -> anyhow::Result<()> + Send + Sync,
{
    async fn on_complete(&self, job_id: &str, outcome: &GenerationOutcome) -> anyhow::Result<()> {
        (self.0)(job_id, outcome)
    }
}

/// Wrap a synchronous closure as a completion handler
pub fn completion_fn<F>(f: F) -> Arc<dyn CompletionHandler>
where
    F: Fn(&str, &GenerationOutcome) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(FnCompletion(f))
}

/// One image generation request
pub struct Job {
    pub id: String,
    pub owner: String,
    pub prompt: String,
    pub conversation_ref: String,
    pub message_ref: String,
    pub checkpoint_override: Option<String>,
    /// 0..=100, written only by the worker while the job is active
    pub progress: u8,
    /// Submission-time estimate, not a live rank
    pub queue_position: u32,
    pub submitted_at: DateTime<Utc>,
    pub(crate) handler: Arc<dyn CompletionHandler>,
}

impl Job {
    pub fn new(request: JobRequest, handler: Arc<dyn CompletionHandler>) -> Self {
        Self {
            id: request
                .job_id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            owner: request.owner,
            prompt: request.prompt,
            conversation_ref: request.conversation_id,
            message_ref: request.message_id,
            checkpoint_override: request.checkpoint,
            progress: 0,
            queue_position: 0,
            submitted_at: Utc::now(),
            handler,
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("progress", &self.progress)
            .field("queue_position", &self.queue_position)
            .finish_non_exhaustive()
    }
}

/// Observer for progress changes of the active job
pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, job: &Job);
}
