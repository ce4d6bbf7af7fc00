//! Main entry point for the image job scheduler

use image_job_scheduler::{api, config::Settings, AppState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::load()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    let json = settings.logging.format == "json";
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer()))
        .init();

    info!("Starting image job scheduler");
    info!(
        "Loaded configuration: server={}:{} backend={} runtime={}",
        settings.server.host,
        settings.server.port,
        settings.image_backend.base_url,
        settings.model_runtime.base_url
    );

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let app_state = Arc::new(AppState::from_settings(settings)?);
    app_state.store.ensure_storage_dir().await?;

    // Image retention runs on its own timer, independent of the scheduler
    let storage = &app_state.settings.storage;
    if storage.retention_secs > 0 {
        app_state.store.clone().spawn_sweeper(
            Duration::from_secs(storage.retention_secs),
            Duration::from_secs(storage.sweep_interval_secs.max(1)),
        );
    }

    // Stand-in for the push collaborator until one subscribes
    let mut events = app_state.notifier.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(
                    job_id = %event.job_id,
                    status = ?event.status,
                    progress = event.progress,
                    "image_progress"
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Progress log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let app = api::create_router(app_state);

    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
