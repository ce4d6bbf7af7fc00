//! Image generation client with circuit breaking, retry, and progress polling
//!
//! Failures never escape [`ImageClient::generate`]: once attempts run out the
//! caller receives a placeholder outcome.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::traits::{ImageBackend, Txt2ImgRequest};
use crate::config::{ImageBackendConfig, PlaceholderConfig, RetryConfig};
use crate::error::{AppError, Result};
use crate::gateway::circuit_breaker::CircuitBreaker;
use crate::queue::job::{GenerationOutcome, Job, PlaceholderKind, ProgressListener};
use crate::response::ImageStore;

/// Exponential backoff between generation attempts
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay after the failed attempt with zero-based index `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }
}

pub struct ImageClient {
    backend: Arc<dyn ImageBackend>,
    breaker: Arc<CircuitBreaker>,
    store: Arc<ImageStore>,
    params: ImageBackendConfig,
    placeholders: PlaceholderConfig,
    retry: RetryPolicy,
}

impl ImageClient {
    pub fn new(
        backend: Arc<dyn ImageBackend>,
        breaker: Arc<CircuitBreaker>,
        store: Arc<ImageStore>,
        params: ImageBackendConfig,
        placeholders: PlaceholderConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            breaker,
            store,
            params,
            placeholders,
            retry,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Best-effort interrupt of whatever the backend is generating
    pub async fn interrupt(&self) -> Result<()> {
        self.backend.interrupt().await
    }

    /// Generate an image for `job`, updating its progress while the backend works.
    ///
    /// Cancellation stops further retries but never abandons an attempt that
    /// is already running on the GPU.
    pub async fn generate(
        &self,
        job: &mut Job,
        listener: &dyn ProgressListener,
        cancel: &CancellationToken,
    ) -> GenerationOutcome {
        // Checked before the breaker so a cancelled job never consumes a half-open probe.
        if cancel.is_cancelled() {
            debug!(job_id = %job.id, "Job already cancelled; not calling backend");
            return self.placeholder(PlaceholderKind::Error, Some("job cancelled".to_string()));
        }

        if !self.breaker.can_attempt() {
            let reason = AppError::CircuitOpen(self.breaker.name().to_string());
            warn!(job_id = %job.id, error = %reason, "Skipping backend call");
            return self.placeholder(PlaceholderKind::Maintenance, Some(reason.to_string()));
        }

        let request = self.build_request(job);
        let mut last_error = None;

        for attempt in 0..self.retry.max_attempts {
            match self.attempt(job, &request, listener).await {
                Ok(url) => {
                    self.breaker.record_success();
                    info!(job_id = %job.id, attempt = attempt + 1, url = %url, "Image generated");
                    return GenerationOutcome::Image { url };
                }
                Err(e) => {
                    warn!(
                        job_id = %job.id,
                        attempt = attempt + 1,
                        max_attempts = self.retry.max_attempts,
                        timeout = e.is_timeout(),
                        error = %e,
                        "Generation attempt failed"
                    );
                    last_error = Some(e);
                }
            }

            if attempt + 1 >= self.retry.max_attempts || cancel.is_cancelled() {
                break;
            }

            let delay = self.retry.delay_for(attempt);
            debug!(job_id = %job.id, delay_ms = delay.as_millis() as u64, "Backing off before retry");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let error = last_error.unwrap_or_else(|| AppError::Internal("no generation attempt ran".into()));
        self.breaker.record_failure(&error);

        let kind = if error.is_timeout() {
            PlaceholderKind::Timeout
        } else {
            PlaceholderKind::Error
        };
        self.placeholder(kind, Some(error.to_string()))
    }

    /// One generation call, polling progress until it resolves
    async fn attempt(
        &self,
        job: &mut Job,
        request: &Txt2ImgRequest,
        listener: &dyn ProgressListener,
    ) -> Result<String> {
        job.progress = 0;

        let call = self.backend.txt2img(request);
        tokio::pin!(call);

        let mut ticker = tokio::time::interval(self.params.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;

        let response = loop {
            tokio::select! {
                biased;
                result = &mut call => break result?,
                _ = ticker.tick() => {
                    match self.backend.progress().await {
                        Ok(report) => {
                            let percent = report.percent();
                            if percent != job.progress {
                                job.progress = percent;
                                listener.on_progress(job);
                            }
                        }
                        Err(e) => debug!(job_id = %job.id, error = %e, "Progress poll failed"),
                    }
                }
            }
        };

        let payload = response
            .images
            .into_iter()
            .next()
            .ok_or(AppError::BackendEmptyResponse)?;

        let url = self.store.save_base64(&payload).await.map_err(|e| match e {
            AppError::Decode(_) => e,
            other => AppError::Decode(format!("Failed to persist image: {}", other)),
        })?;

        job.progress = 100;
        Ok(url)
    }

    fn build_request(&self, job: &Job) -> Txt2ImgRequest {
        Txt2ImgRequest {
            prompt: job.prompt.clone(),
            steps: self.params.steps,
            width: self.params.width,
            height: self.params.height,
            cfg_scale: self.params.cfg_scale,
            sampler_name: self.params.sampler_name.clone(),
            scheduler: self.params.scheduler.clone(),
            checkpoint_override: job.checkpoint_override.clone(),
        }
    }

    fn placeholder(&self, reason: PlaceholderKind, error: Option<String>) -> GenerationOutcome {
        let url = match reason {
            PlaceholderKind::Error => &self.placeholders.error_url,
            PlaceholderKind::Timeout => &self.placeholders.timeout_url,
            PlaceholderKind::Maintenance => &self.placeholders.maintenance_url,
        };
        GenerationOutcome::Placeholder {
            reason,
            url: url.clone(),
            error,
        }
    }
}
