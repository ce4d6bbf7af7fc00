//! Common traits and types for the image backend and the chat model runtime

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Generation request sent to the image backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Txt2ImgRequest {
    pub prompt: String,
    pub steps: u32,
    pub width: u32,
    pub height: u32,
    pub cfg_scale: f32,
    pub sampler_name: String,
    pub scheduler: String,
    /// Checkpoint selector, forwarded as-is when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_override: Option<String>,
}

/// Response from a generation call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Txt2ImgResponse {
    /// Base64 encoded images
    #[serde(default)]
    pub images: Vec<String>,
}

/// Progress report from the backend, `progress` in `0.0..=1.0`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProgressReport {
    #[serde(default)]
    pub progress: f32,
}

impl ProgressReport {
    /// Scale to a whole percentage, clamped to `0..=100`.
    pub fn percent(&self) -> u8 {
        (self.progress * 100.0).round().clamp(0.0, 100.0) as u8
    }
}

/// External image generation service
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Get the backend name
    fn name(&self) -> &str;

    /// Run one generation call. Resolves when the backend finishes.
    async fn txt2img(&self, request: &Txt2ImgRequest) -> Result<Txt2ImgResponse>;

    /// Poll progress of the generation currently running on the backend
    async fn progress(&self) -> Result<ProgressReport>;

    /// Interrupt whatever the backend is currently generating
    async fn interrupt(&self) -> Result<()>;
}

/// Chat model runtime that shares the GPU with the image backend
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    /// Warm-load `model` so chat requests are served from the GPU
    async fn load(&self, model: &str) -> Result<()>;

    /// Evict `model` from the GPU
    async fn unload(&self, model: &str) -> Result<()>;
}
