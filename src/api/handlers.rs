//! HTTP handlers for job submission, polling, and operator endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::error::{AppError, Result};
use crate::gateway::{CircuitSnapshot, GpuStatus};
use crate::notify::JobStatus;
use crate::queue::{CallbackFailure, GenerationOutcome, JobRequest, PendingJobRecord, Submission};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    pub owner: String,
}

/// Polling fallback view of a job
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<PendingJobRecord> for JobStatusResponse {
    fn from(record: PendingJobRecord) -> Self {
        Self {
            job_id: record.job_id,
            status: record.status,
            progress: record.progress,
            queue_position: Some(record.queue_position),
            image_url: None,
            error: None,
        }
    }
}

impl JobStatusResponse {
    fn finished(job_id: String, outcome: &GenerationOutcome) -> Self {
        let status = if outcome.is_image() {
            JobStatus::Complete
        } else {
            JobStatus::Error
        };
        Self {
            job_id,
            status,
            progress: 100,
            queue_position: None,
            image_url: Some(outcome.image_url().to_string()),
            error: outcome.error(),
        }
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "queue": state.queue.stats(),
        "gpu": state.arbiter.occupant(),
        "circuit": state.breaker.state(),
    }))
}

pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JobRequest>,
) -> Result<(StatusCode, Json<Submission>)> {
    let submission = state.queue.submit(request, state.outcomes.clone())?;
    Ok((StatusCode::ACCEPTED, Json(submission)))
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>> {
    if let Some(record) = state.queue.status(&job_id) {
        return Ok(Json(record.into()));
    }
    match state.outcomes.get(&job_id) {
        Some(outcome) => Ok(Json(JobStatusResponse::finished(job_id, &outcome))),
        None => Err(AppError::JobNotFound(job_id)),
    }
}

pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OwnerQuery>,
) -> Json<Vec<PendingJobRecord>> {
    Json(state.registry.list_for(&query.owner))
}

pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<Value>> {
    if state.queue.cancel_job(&job_id, &query.owner).await {
        Ok(Json(json!({ "job_id": job_id, "cancelled": true })))
    } else {
        Err(AppError::JobNotFound(job_id))
    }
}

pub async fn gpu_status(State(state): State<Arc<AppState>>) -> Json<GpuStatus> {
    Json(state.arbiter.status())
}

pub async fn request_chat_access(State(state): State<Arc<AppState>>) -> Json<GpuStatus> {
    state.arbiter.request_chat_access().await;
    Json(state.arbiter.status())
}

pub async fn circuit_status(State(state): State<Arc<AppState>>) -> Json<CircuitSnapshot> {
    Json(state.breaker.snapshot())
}

pub async fn reset_circuit(State(state): State<Arc<AppState>>) -> Json<CircuitSnapshot> {
    info!(circuit = %state.breaker.name(), "Operator requested circuit reset");
    state.breaker.reset();
    Json(state.breaker.snapshot())
}

pub async fn callback_failures(State(state): State<Arc<AppState>>) -> Json<Vec<CallbackFailure>> {
    Json(state.callbacks.failures())
}
