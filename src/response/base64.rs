//! Base64 encoding and decoding utilities

use base64::{engine::general_purpose::STANDARD, Engine};
use crate::error::{AppError, Result};

/// Encode binary data to base64 string
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode an image payload returned by the backend
pub fn decode(encoded: &str) -> Result<Vec<u8>> {
    // Handle data URL format (e.g., "data:image/png;base64,...")
    let data = match encoded.split_once(',') {
        Some((_, payload)) => payload,
        None => encoded,
    };

    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| AppError::Decode(format!("Invalid base64 data: {}", e)))?;

    if bytes.is_empty() {
        return Err(AppError::Decode("Image payload is empty".to_string()));
    }
    Ok(bytes)
}
