//! Route table

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::api::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let storage = &state.settings.storage;
    let images = ServeDir::new(&storage.base_path);

    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/v1/images/jobs",
            post(handlers::submit_job).get(handlers::list_jobs),
        )
        .route(
            "/v1/images/jobs/:job_id",
            get(handlers::get_job).delete(handlers::cancel_job),
        )
        .route("/v1/gpu", get(handlers::gpu_status))
        .route("/v1/gpu/chat", post(handlers::request_chat_access))
        .route("/v1/circuit", get(handlers::circuit_status))
        .route("/v1/circuit/reset", post(handlers::reset_circuit))
        .route("/v1/callbacks/failures", get(handlers::callback_failures))
        .nest_service(&storage.url_prefix, images)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
