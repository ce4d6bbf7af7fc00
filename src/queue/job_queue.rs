//! FIFO image job queue with a single GPU worker
//!
//! Jobs are dispatched to the backend strictly one at a time and in
//! submission order. The worker is spawned on demand and exits when the
//! queue drains; the `worker_running` flag is only flipped under the state
//! lock, so a submission can never strand a job behind an exiting worker.
//!
//! Cancellation is cooperative. A queued job is simply removed. An active
//! job gets its token cancelled and the backend interrupted; the worker
//! checks the token before dispatch and again, atomically with releasing the
//! active slot, before delivering. A cancelled job's outcome is discarded.

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::error::{AppError, Result};
use crate::gateway::gpu_arbiter::GpuArbiter;
use crate::gateway::image_client::ImageClient;
use crate::notify::{ImageProgressEvent, JobStatus, ProgressNotifier};
use crate::queue::callback::SafeCallbackExecutor;
use crate::queue::job::{CompletionHandler, GenerationOutcome, Job, JobRequest, ProgressListener};
use crate::queue::pending::{PendingJobRecord, PendingJobRegistry};

/// Receipt handed back to the submitter
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub job_id: String,
    pub queue_position: u32,
    pub estimated_seconds: u64,
}

/// Queue statistics
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub active_job: Option<String>,
    pub dispatched: u64,
    pub delivered: u64,
    pub cancelled: u64,
    pub max_queue_size: usize,
}

struct ActiveJob {
    id: String,
    owner: String,
    token: CancellationToken,
    cancel_event: ImageProgressEvent,
}

#[derive(Default)]
struct QueueState {
    waiting: VecDeque<Job>,
    active: Option<ActiveJob>,
    worker_running: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    client: Arc<ImageClient>,
    arbiter: Arc<GpuArbiter>,
    registry: Arc<PendingJobRegistry>,
    callbacks: Arc<SafeCallbackExecutor>,
    notifier: Arc<dyn ProgressNotifier>,
    config: QueueConfig,
    dispatched: AtomicU64,
    delivered: AtomicU64,
    cancelled: AtomicU64,
}

/// Image job queue
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    pub fn new(
        client: Arc<ImageClient>,
        arbiter: Arc<GpuArbiter>,
        registry: Arc<PendingJobRegistry>,
        callbacks: Arc<SafeCallbackExecutor>,
        notifier: Arc<dyn ProgressNotifier>,
        config: QueueConfig,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                client,
                arbiter,
                registry,
                callbacks,
                notifier,
                config,
                dispatched: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                cancelled: AtomicU64::new(0),
            }),
        }
    }

    /// Build a job from `request` and enqueue it
    pub fn submit(&self, request: JobRequest, handler: Arc<dyn CompletionHandler>) -> Result<Submission> {
        if request.prompt.trim().is_empty() {
            return Err(AppError::InvalidRequest("prompt cannot be empty".to_string()));
        }
        let job = Job::new(request, handler);
        let job_id = job.id.clone();
        let queue_position = self.add_job(job)?;
        Ok(Submission {
            job_id,
            queue_position,
            estimated_seconds: self.estimate_secs(queue_position),
        })
    }

    /// Append `job` and make sure a worker is draining the queue.
    ///
    /// The returned position counts the active job, so it is a submission-time
    /// estimate and is never renumbered.
    pub fn add_job(&self, mut job: Job) -> Result<u32> {
        let (spawn, position) = {
            let mut state = self.inner.state.lock();

            if state.waiting.len() >= self.inner.config.max_queue_size {
                return Err(AppError::QueueFull(state.waiting.len()));
            }
            let duplicate = state.waiting.iter().any(|j| j.id == job.id)
                || state.active.as_ref().is_some_and(|a| a.id == job.id);
            if duplicate {
                return Err(AppError::InvalidRequest(format!("job {} is already queued", job.id)));
            }

            let ahead = state.waiting.len() + usize::from(state.active.is_some());
            job.queue_position = (ahead + 1) as u32;

            self.inner
                .registry
                .register(&job.id, &job.owner, &job.conversation_ref, job.queue_position);
            self.inner.notifier.notify(
                ImageProgressEvent::for_job(&job, JobStatus::Queued)
                    .with_estimate(self.estimate_secs(job.queue_position)),
            );

            info!(job_id = %job.id, owner = %job.owner, queue_position = job.queue_position, "Image job queued");
            let position = job.queue_position;
            state.waiting.push_back(job);

            let spawn = !state.worker_running;
            state.worker_running = true;
            (spawn, position)
        };

        if spawn {
            debug!("Starting image queue worker");
            tokio::spawn(run_worker(self.inner.clone()));
        }
        Ok(position)
    }

    /// Cancel a queued or active job owned by `owner`.
    ///
    /// Returns `false` when the job is unknown, already finished, or owned by
    /// someone else.
    pub async fn cancel_job(&self, job_id: &str, owner: &str) -> bool {
        enum Found {
            Queued(Job),
            Active(ImageProgressEvent),
            AlreadyCancelled,
            Missing,
        }

        let found = {
            let mut state = self.inner.state.lock();
            if let Some(index) = state
                .waiting
                .iter()
                .position(|j| j.id == job_id && j.owner == owner)
            {
                state.waiting.remove(index).map(Found::Queued).unwrap_or(Found::Missing)
            } else {
                match state.active.as_ref() {
                    Some(active) if active.id == job_id && active.owner == owner => {
                        if active.token.is_cancelled() {
                            Found::AlreadyCancelled
                        } else {
                            active.token.cancel();
                            Found::Active(active.cancel_event.clone())
                        }
                    }
                    _ => Found::Missing,
                }
            }
        };

        match found {
            Found::Queued(job) => {
                info!(job_id = %job_id, "Cancelled queued image job");
                self.inner.registry.remove(job_id);
                self.inner.cancelled.fetch_add(1, Ordering::Relaxed);
                self.inner
                    .notifier
                    .notify(ImageProgressEvent::for_job(&job, JobStatus::Cancelled));
                true
            }
            Found::Active(event) => {
                info!(job_id = %job_id, "Cancelling active image job");
                self.inner.registry.remove(job_id);
                self.inner.cancelled.fetch_add(1, Ordering::Relaxed);
                self.inner.notifier.notify(event);
                if let Err(e) = self.inner.client.interrupt().await {
                    warn!(job_id = %job_id, error = %e, "Backend interrupt failed; result will be discarded");
                }
                true
            }
            Found::AlreadyCancelled => true,
            Found::Missing => false,
        }
    }

    /// Polling view of a pending or active job
    pub fn status(&self, job_id: &str) -> Option<PendingJobRecord> {
        self.inner.registry.get(job_id)
    }

    pub fn active_job_id(&self) -> Option<String> {
        self.inner.state.lock().active.as_ref().map(|a| a.id.clone())
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        QueueStats {
            waiting: state.waiting.len(),
            active_job: state.active.as_ref().map(|a| a.id.clone()),
            dispatched: self.inner.dispatched.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            cancelled: self.inner.cancelled.load(Ordering::Relaxed),
            max_queue_size: self.inner.config.max_queue_size,
        }
    }

    fn estimate_secs(&self, queue_position: u32) -> u64 {
        u64::from(queue_position) * self.inner.config.estimate_secs_per_job
    }
}

/// Drain the queue one job at a time, exiting when it is empty
async fn run_worker(inner: Arc<QueueInner>) {
    loop {
        let next = {
            let mut state = inner.state.lock();
            match state.waiting.pop_front() {
                Some(job) => {
                    let token = CancellationToken::new();
                    state.active = Some(ActiveJob {
                        id: job.id.clone(),
                        owner: job.owner.clone(),
                        token: token.clone(),
                        cancel_event: ImageProgressEvent::for_job(&job, JobStatus::Cancelled),
                    });
                    Some((job, token))
                }
                None => {
                    state.worker_running = false;
                    None
                }
            }
        };

        let Some((mut job, token)) = next else {
            debug!("Image queue drained; worker exiting");
            return;
        };

        inner.process(&mut job, &token).await;

        {
            let mut state = inner.state.lock();
            if state.active.as_ref().is_some_and(|a| a.id == job.id) {
                state.active = None;
            }
        }
        inner.registry.remove(&job.id);
    }
}

impl QueueInner {
    async fn process(&self, job: &mut Job, token: &CancellationToken) {
        if token.is_cancelled() {
            info!(job_id = %job.id, "Job cancelled before dispatch; skipping");
            return;
        }

        self.arbiter.request_image_access().await;

        // The GPU switch can take seconds; a cancel may have landed meanwhile.
        if token.is_cancelled() {
            info!(job_id = %job.id, "Job cancelled during GPU switch; skipping");
            self.arbiter.request_chat_access().await;
            return;
        }

        let run = AssertUnwindSafe(self.dispatch(job, token)).catch_unwind().await;
        if run.is_err() {
            error!(job_id = %job.id, "Image job panicked; worker continues");
        }

        // Always hand the GPU back, whatever happened above.
        self.arbiter.request_chat_access().await;
    }

    async fn dispatch(&self, job: &mut Job, token: &CancellationToken) {
        if !self.notify_unless_cancelled(token, || {
            self.registry.mark_processing(&job.id);
            ImageProgressEvent::for_job(&*job, JobStatus::Processing)
        }) {
            info!(job_id = %job.id, "Job cancelled before dispatch; skipping");
            return;
        }
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        info!(job_id = %job.id, "Dispatching image job to backend");

        let listener = WorkerProgress { queue: self, token };
        let outcome = self.client.generate(job, &listener, token).await;

        if self.release_unless_cancelled(&job.id, token) {
            info!(job_id = %job.id, "Job cancelled during generation; discarding result");
            return;
        }

        self.notifier.notify(completion_event(job, &outcome));

        let handler = job.handler.clone();
        let context = format!("conversation={} message={}", job.conversation_ref, job.message_ref);
        if self
            .callbacks
            .execute(handler.as_ref(), &outcome, &job.id, Some(&context))
            .await
        {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Emit a processing-phase event unless the job has been cancelled.
    ///
    /// `cancel_job` cancels the token under the state lock, so holding it here
    /// keeps every such event ahead of the job's `cancelled` event.
    fn notify_unless_cancelled<F>(&self, token: &CancellationToken, event: F) -> bool
    where
        F: FnOnce() -> ImageProgressEvent,
    {
        let _state = self.state.lock();
        if token.is_cancelled() {
            return false;
        }
        self.notifier.notify(event());
        true
    }

    /// Clear the active slot. Returns `true` if the job was cancelled first.
    fn release_unless_cancelled(&self, job_id: &str, token: &CancellationToken) -> bool {
        let mut state = self.state.lock();
        let cancelled = token.is_cancelled();
        if state.active.as_ref().is_some_and(|a| a.id == job_id) {
            state.active = None;
        }
        cancelled
    }
}

fn completion_event(job: &Job, outcome: &GenerationOutcome) -> ImageProgressEvent {
    match outcome {
        GenerationOutcome::Image { url } => {
            ImageProgressEvent::for_job(job, JobStatus::Complete).with_image_url(url.clone())
        }
        GenerationOutcome::Placeholder { url, .. } => {
            let error = outcome.error().unwrap_or_default();
            ImageProgressEvent::for_job(job, JobStatus::Error)
                .with_image_url(url.clone())
                .with_error(error)
        }
    }
}

struct WorkerProgress<'a> {
    queue: &'a QueueInner,
    token: &'a CancellationToken,
}

impl ProgressListener for WorkerProgress<'_> {
    fn on_progress(&self, job: &Job) {
        self.queue.notify_unless_cancelled(self.token, || {
            self.queue
                .registry
                .update_progress(&job.id, Some(job.progress), None);
            ImageProgressEvent::for_job(job, JobStatus::Processing)
        });
    }
}
