//! Common error types for the image job scheduler

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Image backend timed out: {0}")]
    BackendTimeout(String),

    #[error("Image backend returned {status}: {body}")]
    BackendHttp { status: u16, body: String },

    #[error("Image backend returned no images")]
    BackendEmptyResponse,

    #[error("Failed to decode image payload: {0}")]
    Decode(String),

    #[error("Circuit open for backend: {0}")]
    CircuitOpen(String),

    #[error("Callback delivery failed for job {job_id}: {reason}")]
    CallbackDelivery { job_id: String, reason: String },

    #[error("Job queue is full ({0} jobs waiting)")]
    QueueFull(usize),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the error came from the transport timing out.
    pub fn is_timeout(&self) -> bool {
        match self {
            AppError::BackendTimeout(_) => true,
            AppError::HttpClient(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// Error response format (OpenAI compatible)
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code) = match &self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
            AppError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
            AppError::Json(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", Some("invalid_json")),
            AppError::HttpClient(_) => (StatusCode::BAD_GATEWAY, "backend_error", None),
            AppError::BackendTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout_error", None),
            AppError::BackendHttp { .. } => (StatusCode::BAD_GATEWAY, "backend_error", None),
            AppError::BackendEmptyResponse => (StatusCode::BAD_GATEWAY, "backend_error", Some("empty_response")),
            AppError::Decode(_) => (StatusCode::BAD_GATEWAY, "backend_error", Some("decode_failed")),
            AppError::CircuitOpen(_) => (StatusCode::SERVICE_UNAVAILABLE, "server_error", Some("circuit_open")),
            AppError::CallbackDelivery { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
            AppError::QueueFull(_) => (StatusCode::SERVICE_UNAVAILABLE, "server_error", Some("queue_full")),
            AppError::JobNotFound(_) => (StatusCode::NOT_FOUND, "not_found_error", Some("job_not_found")),
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", None),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
        };

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                message: self.to_string(),
                r#type: error_type.to_string(),
                code: code.map(|c| c.to_string()),
            },
        });

        (status, body).into_response()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
