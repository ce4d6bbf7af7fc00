//! HTTP client for the external image generation service

use async_trait::async_trait;
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::debug;

use crate::backend::traits::{ImageBackend, ProgressReport, Txt2ImgRequest, Txt2ImgResponse};
use crate::config::ImageBackendConfig;
use crate::error::{AppError, Result};

const TXT2IMG_PATH: &str = "/sdapi/v1/txt2img";
const PROGRESS_PATH: &str = "/sdapi/v1/progress";
const INTERRUPT_PATH: &str = "/sdapi/v1/interrupt";

/// HTTP-based image generation backend
pub struct HttpImageBackend {
    name: String,
    client: Client,
    base_url: String,
    progress_timeout: Duration,
}

impl HttpImageBackend {
    /// Create a new HTTP backend from configuration
    pub fn new(config: &ImageBackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: "txt2img".to_string(),
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            progress_timeout: Duration::from_secs(config.progress_timeout_secs),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map transport errors so timeouts stay distinguishable for the retry loop
    fn classify(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::BackendTimeout(format!("{}: {}", self.name, e))
        } else {
            AppError::HttpClient(e)
        }
    }

    async fn ensure_success(response: Response) -> Result<Response> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(AppError::BackendHttp {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ImageBackend for HttpImageBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn txt2img(&self, request: &Txt2ImgRequest) -> Result<Txt2ImgResponse> {
        debug!(backend = %self.name, url = %self.base_url, "Sending generate request");

        let response = self
            .client
            .post(self.url(TXT2IMG_PATH))
            .json(request)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let response = Self::ensure_success(response).await?;
        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        serde_json::from_slice::<Txt2ImgResponse>(&body)
            .map_err(|e| AppError::Decode(format!("Failed to parse response: {}", e)))
    }

    async fn progress(&self) -> Result<ProgressReport> {
        let response = self
            .client
            .get(self.url(PROGRESS_PATH))
            .timeout(self.progress_timeout)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let response = Self::ensure_success(response).await?;
        Ok(response.json::<ProgressReport>().await?)
    }

    async fn interrupt(&self) -> Result<()> {
        let response = self
            .client
            .post(self.url(INTERRUPT_PATH))
            .timeout(self.progress_timeout)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        Self::ensure_success(response).await?;
        Ok(())
    }
}
