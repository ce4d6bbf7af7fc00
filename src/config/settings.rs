//! Application settings and configuration management

use crate::error::{AppError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub placeholders: PlaceholderConfig,
    #[serde(default)]
    pub image_backend: ImageBackendConfig,
    #[serde(default)]
    pub model_runtime: ModelRuntimeConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub callbacks: CallbackConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Storage for generated images
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub base_path: String,
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,
    /// Generated files older than this are swept. Zero disables the sweeper.
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_storage_path() -> String {
    "./generated_images".to_string()
}

fn default_url_prefix() -> String {
    "/images".to_string()
}

fn default_retention() -> u64 {
    7 * 24 * 3600
}

fn default_sweep_interval() -> u64 {
    3600
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: default_storage_path(),
            url_prefix: default_url_prefix(),
            retention_secs: default_retention(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// Well-known fallback image references
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaceholderConfig {
    #[serde(default = "default_error_placeholder")]
    pub error_url: String,
    #[serde(default = "default_timeout_placeholder")]
    pub timeout_url: String,
    #[serde(default = "default_maintenance_placeholder")]
    pub maintenance_url: String,
}

fn default_error_placeholder() -> String {
    "/static/placeholders/error.png".to_string()
}

fn default_timeout_placeholder() -> String {
    "/static/placeholders/timeout.png".to_string()
}

fn default_maintenance_placeholder() -> String {
    "/static/placeholders/maintenance.png".to_string()
}

impl Default for PlaceholderConfig {
    fn default() -> Self {
        Self {
            error_url: default_error_placeholder(),
            timeout_url: default_timeout_placeholder(),
            maintenance_url: default_maintenance_placeholder(),
        }
    }
}

/// External image generation backend
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageBackendConfig {
    #[serde(default = "default_backend_url")]
    pub base_url: String,
    /// Ceiling for a single generation attempt.
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_progress_timeout")]
    pub progress_timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_dimension")]
    pub width: u32,
    #[serde(default = "default_dimension")]
    pub height: u32,
    #[serde(default = "default_cfg_scale")]
    pub cfg_scale: f32,
    #[serde(default = "default_sampler")]
    pub sampler_name: String,
    #[serde(default = "default_scheduler")]
    pub scheduler: String,
}

fn default_backend_url() -> String {
    "http://127.0.0.1:7860".to_string()
}

fn default_backend_timeout() -> u64 {
    1200
}

fn default_progress_timeout() -> u64 {
    5
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_steps() -> u32 {
    25
}

fn default_dimension() -> u32 {
    1024
}

fn default_cfg_scale() -> f32 {
    7.0
}

fn default_sampler() -> String {
    "DPM++ 2M".to_string()
}

fn default_scheduler() -> String {
    "Karras".to_string()
}

impl Default for ImageBackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            timeout_secs: default_backend_timeout(),
            progress_timeout_secs: default_progress_timeout(),
            poll_interval_ms: default_poll_interval(),
            steps: default_steps(),
            width: default_dimension(),
            height: default_dimension(),
            cfg_scale: default_cfg_scale(),
            sampler_name: default_sampler(),
            scheduler: default_scheduler(),
        }
    }
}

impl ImageBackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Chat model runtime, signalled on GPU mode switches
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelRuntimeConfig {
    #[serde(default = "default_runtime_url")]
    pub base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_runtime_timeout")]
    pub timeout_secs: u64,
}

fn default_runtime_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_chat_model() -> String {
    "llama3".to_string()
}

fn default_runtime_timeout() -> u64 {
    30
}

impl Default for ModelRuntimeConfig {
    fn default() -> Self {
        Self {
            base_url: default_runtime_url(),
            chat_model: default_chat_model(),
            timeout_secs: default_runtime_timeout(),
        }
    }
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_circuit_timeout")]
    pub timeout_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_circuit_timeout() -> u64 {
    60
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            timeout_secs: default_circuit_timeout(),
        }
    }
}

/// Retry policy for generation attempts
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
        }
    }
}

/// Completion handler delivery
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CallbackConfig {
    #[serde(default = "default_callback_retries")]
    pub max_retries: u32,
    #[serde(default = "default_callback_delay")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_callback_retries() -> u32 {
    2
}

fn default_callback_delay() -> u64 {
    500
}

fn default_history_limit() -> usize {
    100
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            max_retries: default_callback_retries(),
            retry_delay_ms: default_callback_delay(),
            history_limit: default_history_limit(),
        }
    }
}

/// Job queue limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// Fixed per-job estimate used for `estimated_seconds`.
    #[serde(default = "default_estimate")]
    pub estimate_secs_per_job: u64,
}

fn default_max_queue_size() -> usize {
    100
}

fn default_estimate() -> u64 {
    30
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            estimate_secs_per_job: default_estimate(),
        }
    }
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/default.toml")
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .add_source(File::with_name(path.as_ref().to_str().unwrap_or("config/default")).required(false))
            // Override with environment variables (prefixed with IMAGE_SCHEDULER_)
            .add_source(
                Environment::with_prefix("IMAGE_SCHEDULER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(invalid("Server port cannot be 0"));
        }
        if self.image_backend.base_url.is_empty() {
            return Err(invalid("image_backend.base_url cannot be empty"));
        }
        if self.model_runtime.base_url.is_empty() {
            return Err(invalid("model_runtime.base_url cannot be empty"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(invalid("circuit_breaker.failure_threshold must be at least 1"));
        }
        if self.image_backend.poll_interval_ms == 0 {
            return Err(invalid("image_backend.poll_interval_ms must be positive"));
        }
        let prefix = self.storage.url_prefix.trim_end_matches('/');
        if !prefix.starts_with('/') || prefix.is_empty() {
            return Err(invalid("storage.url_prefix must be a non-root path starting with '/'"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> AppError {
    AppError::Config(config::ConfigError::Message(message.to_string()))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            storage: StorageConfig::default(),
            placeholders: PlaceholderConfig::default(),
            image_backend: ImageBackendConfig::default(),
            model_runtime: ModelRuntimeConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            callbacks: CallbackConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}
