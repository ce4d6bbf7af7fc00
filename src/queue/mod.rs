//! Queue module - Image jobs, the single-worker queue, and completion delivery

pub mod callback;
pub mod job;
pub mod job_queue;
pub mod pending;

pub use callback::{CallbackFailure, SafeCallbackExecutor};
pub use job::{
    completion_fn, CompletionHandler, GenerationOutcome, Job, JobRequest, PlaceholderKind,
    ProgressListener,
};
pub use job_queue::{JobQueue, QueueStats, Submission};
pub use pending::{PendingJobRecord, PendingJobRegistry};
