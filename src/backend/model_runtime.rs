//! HTTP client for the chat model runtime
//!
//! The runtime only sees two signals from the scheduler: warm-load a model
//! onto the GPU, or unload it. Both go through the runtime's generate
//! endpoint with a `keep_alive` hint.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::backend::traits::ModelRuntime;
use crate::config::ModelRuntimeConfig;
use crate::error::{AppError, Result};

const GENERATE_PATH: &str = "/api/generate";
const WARM_KEEP_ALIVE: &str = "5m";

/// Model runtime reached over HTTP
pub struct HttpModelRuntime {
    client: Client,
    base_url: String,
}

impl HttpModelRuntime {
    pub fn new(config: &ModelRuntimeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, body: serde_json::Value) -> Result<()> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, GENERATE_PATH))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::BackendHttp {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ModelRuntime for HttpModelRuntime {
    async fn load(&self, model: &str) -> Result<()> {
        debug!(model = %model, "Warm-loading chat model");
        self.post(json!({ "model": model, "prompt": "", "keep_alive": WARM_KEEP_ALIVE }))
            .await
    }

    async fn unload(&self, model: &str) -> Result<()> {
        debug!(model = %model, "Unloading chat model");
        self.post(json!({ "model": model, "keep_alive": 0 })).await
    }
}
