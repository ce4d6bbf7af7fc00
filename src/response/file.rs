//! Durable storage for generated images

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::error::Result;
use crate::response::base64;

/// Writes decoded images under unique names and hands back stable URLs
pub struct ImageStore {
    storage_path: PathBuf,
    url_prefix: String,
}

impl ImageStore {
    pub fn new(storage_path: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            storage_path: storage_path.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.base_path, &config.url_prefix)
    }

    /// Ensure the storage directory exists
    pub async fn ensure_storage_dir(&self) -> Result<()> {
        if !self.storage_path.exists() {
            fs::create_dir_all(&self.storage_path).await?;
            debug!(path = ?self.storage_path, "Created storage directory");
        }
        Ok(())
    }

    /// Decode a base64 payload, persist it, and return its URL
    pub async fn save_base64(&self, b64_data: &str) -> Result<String> {
        let image_data = base64::decode(b64_data)?;
        let format = detect_image_format(&image_data).unwrap_or("png");
        let filename = self.save_raw(&image_data, format).await?;
        Ok(self.url_for(&filename))
    }

    /// Save raw image data and return the generated file name
    pub async fn save_raw(&self, data: &[u8], format: &str) -> Result<String> {
        self.ensure_storage_dir().await?;

        let filename = format!("{}.{}", Uuid::new_v4(), format);
        let file_path = self.storage_path.join(&filename);

        fs::write(&file_path, data).await?;

        debug!(path = ?file_path, size = data.len(), "Saved image file");
        Ok(filename)
    }

    pub fn url_for(&self, filename: &str) -> String {
        format!("{}/{}", self.url_prefix, filename)
    }

    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.storage_path.join(filename)
    }

    /// Remove files older than `max_age`, returning how many were deleted
    pub async fn cleanup(&self, max_age: Duration) -> Result<usize> {
        if !self.storage_path.exists() {
            return Ok(0);
        }

        let mut deleted = 0;
        let now = std::time::SystemTime::now();
        let mut entries = fs::read_dir(&self.storage_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            let expired = now
                .duration_since(modified)
                .map(|age| age > max_age)
                .unwrap_or(false);
            if metadata.is_file() && expired && fs::remove_file(entry.path()).await.is_ok() {
                deleted += 1;
                debug!(path = ?entry.path(), "Deleted old file");
            }
        }

        Ok(deleted)
    }

    /// Periodically sweep expired images. Shares nothing with the scheduler.
    pub fn spawn_sweeper(self: Arc<Self>, max_age: Duration, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match self.cleanup(max_age).await {
                    Ok(0) => {}
                    Ok(deleted) => info!(deleted, "Swept expired images"),
                    Err(e) => warn!(error = %e, "Image sweep failed"),
                }
            }
        })
    }
}

/// Detect image format from binary data using magic bytes
fn detect_image_format(data: &[u8]) -> Option<&'static str> {
    if data.len() < 8 {
        return None;
    }

    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("png");
    }

    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("jpg");
    }

    if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        return Some("webp");
    }

    None
}
