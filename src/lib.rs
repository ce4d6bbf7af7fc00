//! GPU-exclusive image job scheduler
//!
//! Serializes image generation requests onto a GPU shared with an
//! interactive chat model, protecting the flaky image backend with a circuit
//! breaker and retries, and reporting progress to clients.

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod gateway;
pub mod notify;
pub mod queue;
pub mod response;

pub use error::{AppError, Result};

use std::sync::Arc;

use api::outcomes::OutcomeCache;
use backend::{HttpImageBackend, HttpModelRuntime, ImageBackend, ModelRuntime};
use config::Settings;
use gateway::{CircuitBreaker, GpuArbiter, ImageClient, RetryPolicy};
use notify::BroadcastNotifier;
use queue::{JobQueue, PendingJobRegistry, SafeCallbackExecutor};
use response::ImageStore;

/// Application state shared across all handlers.
///
/// Built once at process start; every service here exists exactly once.
pub struct AppState {
    pub settings: Arc<Settings>,
    pub breaker: Arc<CircuitBreaker>,
    pub arbiter: Arc<GpuArbiter>,
    pub registry: Arc<PendingJobRegistry>,
    pub callbacks: Arc<SafeCallbackExecutor>,
    pub notifier: Arc<BroadcastNotifier>,
    pub store: Arc<ImageStore>,
    pub queue: Arc<JobQueue>,
    pub outcomes: Arc<OutcomeCache>,
}

impl AppState {
    /// Wire the HTTP clients for the image backend and model runtime
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let backend = Arc::new(HttpImageBackend::new(&settings.image_backend)?);
        let runtime = Arc::new(HttpModelRuntime::new(&settings.model_runtime)?);
        Ok(Self::with_services(settings, backend, runtime))
    }

    /// Wire the scheduler around the given collaborators
    pub fn with_services(
        settings: Settings,
        backend: Arc<dyn ImageBackend>,
        runtime: Arc<dyn ModelRuntime>,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::from_config(
            backend.name().to_string(),
            &settings.circuit_breaker,
        ));
        let arbiter = Arc::new(GpuArbiter::new(runtime, settings.model_runtime.chat_model.clone()));
        let store = Arc::new(ImageStore::from_config(&settings.storage));
        let client = Arc::new(ImageClient::new(
            backend,
            breaker.clone(),
            store.clone(),
            settings.image_backend.clone(),
            settings.placeholders.clone(),
            RetryPolicy::from(&settings.retry),
        ));
        let registry = Arc::new(PendingJobRegistry::new());
        let callbacks = Arc::new(SafeCallbackExecutor::from_config(&settings.callbacks));
        let notifier = Arc::new(BroadcastNotifier::default());
        let queue = Arc::new(JobQueue::new(
            client,
            arbiter.clone(),
            registry.clone(),
            callbacks.clone(),
            notifier.clone(),
            settings.queue.clone(),
        ));

        Self {
            settings: Arc::new(settings),
            breaker,
            arbiter,
            registry,
            callbacks,
            notifier,
            store,
            queue,
            outcomes: Arc::new(OutcomeCache::default()),
        }
    }
}
