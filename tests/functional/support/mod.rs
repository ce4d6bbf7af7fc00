//! Fakes shared by the functional tests
#![allow(dead_code)]

use async_trait::async_trait;
use image_job_scheduler::backend::{ImageBackend, ModelRuntime, ProgressReport, Txt2ImgRequest, Txt2ImgResponse};
use image_job_scheduler::config::Settings;
use image_job_scheduler::error::{AppError, Result};
use image_job_scheduler::queue::{completion_fn, CompletionHandler, GenerationOutcome, JobRequest};
use image_job_scheduler::response::base64;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

/// Smallest valid PNG signature plus padding
pub const PNG_BYTES: [u8; 12] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

pub fn png_b64() -> String {
    base64::encode(&PNG_BYTES)
}

/// In-memory image backend.
///
/// Each `txt2img` call waits for a permit on `gate` when one is set, which
/// lets tests hold a job "on the GPU".
#[derive(Default)]
pub struct FakeBackend {
    pub prompts: Mutex<Vec<String>>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub interrupts: AtomicUsize,
    pub fail: AtomicBool,
    pub gate: Option<Arc<Semaphore>>,
}

impl FakeBackend {
    pub fn gated() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let backend = Arc::new(Self {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        (backend, gate)
    }

    pub fn open() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl ImageBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn txt2img(&self, request: &Txt2ImgRequest) -> Result<Txt2ImgResponse> {
        self.prompts.lock().push(request.prompt.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::BackendHttp {
                status: 500,
                body: "CUDA out of memory".into(),
            });
        }
        Ok(Txt2ImgResponse {
            images: vec![png_b64()],
        })
    }

    async fn progress(&self) -> Result<ProgressReport> {
        Ok(ProgressReport { progress: 0.5 })
    }

    async fn interrupt(&self) -> Result<()> {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Model runtime that records the signals it receives
#[derive(Default)]
pub struct FakeRuntime {
    pub calls: Mutex<Vec<String>>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub delay: Option<Duration>,
}

impl FakeRuntime {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    async fn record(&self, call: String) -> Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().push(call);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ModelRuntime for FakeRuntime {
    async fn load(&self, model: &str) -> Result<()> {
        self.record(format!("load:{}", model)).await
    }

    async fn unload(&self, model: &str) -> Result<()> {
        self.record(format!("unload:{}", model)).await
    }
}

/// Settings tuned for fast tests, storing images under `storage`
pub fn test_settings(storage: &std::path::Path) -> Settings {
    let mut settings = Settings::default();
    settings.storage.base_path = storage.to_string_lossy().to_string();
    settings.image_backend.poll_interval_ms = 10;
    settings.retry.base_delay_ms = 1;
    settings.callbacks.retry_delay_ms = 1;
    settings
}

pub fn request(owner: &str, prompt: &str) -> JobRequest {
    JobRequest {
        owner: owner.to_string(),
        prompt: prompt.to_string(),
        conversation_id: "conv-1".to_string(),
        message_id: format!("msg-{}", prompt),
        job_id: Some(format!("job-{}", prompt)),
        checkpoint: None,
    }
}

/// Completion handler that forwards every outcome to a channel
pub fn channel_handler() -> (
    Arc<dyn CompletionHandler>,
    mpsc::UnboundedReceiver<(String, GenerationOutcome)>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = completion_fn(move |job_id, outcome| {
        tx.send((job_id.to_string(), outcome.clone()))
            .map_err(|_| anyhow::anyhow!("test receiver dropped"))
    });
    (handler, rx)
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
