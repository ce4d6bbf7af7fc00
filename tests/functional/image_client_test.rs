//! Functional tests for the image client against a mocked backend

mod support;

use image_job_scheduler::backend::HttpImageBackend;
use image_job_scheduler::config::{ImageBackendConfig, PlaceholderConfig};
use image_job_scheduler::gateway::{CircuitBreaker, CircuitState, ImageClient, RetryPolicy};
use image_job_scheduler::queue::{completion_fn, GenerationOutcome, Job, PlaceholderKind, ProgressListener};
use image_job_scheduler::response::ImageStore;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use support::{png_b64, request};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TXT2IMG: &str = "/sdapi/v1/txt2img";
const PROGRESS: &str = "/sdapi/v1/progress";

#[derive(Default)]
struct RecordingListener {
    updates: Mutex<Vec<u8>>,
}

impl ProgressListener for RecordingListener {
    fn on_progress(&self, job: &Job) {
        self.updates.lock().push(job.progress);
    }
}

struct Harness {
    client: ImageClient,
    breaker: Arc<CircuitBreaker>,
    dir: TempDir,
}

fn harness(server: &MockServer, base_delay: Duration) -> Harness {
    let dir = TempDir::new().unwrap();
    let config = ImageBackendConfig {
        base_url: server.uri(),
        timeout_secs: 1,
        poll_interval_ms: 10,
        ..Default::default()
    };
    let backend = Arc::new(HttpImageBackend::new(&config).unwrap());
    let breaker = Arc::new(CircuitBreaker::new("txt2img", 5, Duration::from_secs(60)));
    let store = Arc::new(ImageStore::new(dir.path(), "/images"));
    let client = ImageClient::new(
        backend,
        breaker.clone(),
        store,
        config,
        PlaceholderConfig::default(),
        RetryPolicy {
            max_attempts: 3,
            base_delay,
        },
    );
    Harness { client, breaker, dir }
}

fn job(prompt: &str, checkpoint: Option<&str>) -> Job {
    let mut req = request("alice", prompt);
    req.checkpoint = checkpoint.map(String::from);
    Job::new(req, completion_fn(|_, _| Ok(())))
}

async fn mount_progress(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(PROGRESS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "progress": 0.25 })))
        .mount(server)
        .await;
}

async fn txt2img_calls(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == TXT2IMG)
        .count()
}

#[tokio::test]
async fn test_success_persists_image_and_reports_progress() {
    let server = MockServer::start().await;
    mount_progress(&server).await;
    Mock::given(method("POST"))
        .and(path(TXT2IMG))
        .and(body_partial_json(json!({
            "prompt": "a lighthouse",
            "checkpoint_override": "sdxl-turbo",
            "steps": 25
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "images": [png_b64()] }))
                .set_delay(Duration::from_millis(150)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, Duration::from_millis(10));
    let listener = RecordingListener::default();
    let mut job = job("a lighthouse", Some("sdxl-turbo"));

    let outcome = h.client.generate(&mut job, &listener, &CancellationToken::new()).await;

    let url = match outcome {
        GenerationOutcome::Image { url } => url,
        other => panic!("expected an image, got {:?}", other),
    };
    let filename = url.strip_prefix("/images/").unwrap();
    assert!(filename.ends_with(".png"));
    assert!(h.dir.path().join(filename).exists());
    assert_eq!(job.progress, 100);
    assert!(listener.updates.lock().contains(&25));

    let snapshot = h.breaker.snapshot();
    assert_eq!(snapshot.success_count, 1);
    assert_eq!(snapshot.failure_count, 0);
}

#[tokio::test]
async fn test_two_timeouts_then_success_records_one_success() {
    let server = MockServer::start().await;
    mount_progress(&server).await;
    Mock::given(method("POST"))
        .and(path(TXT2IMG))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "images": [png_b64()] }))
                .set_delay(Duration::from_millis(1500)),
        )
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TXT2IMG))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "images": [png_b64()] })))
        .mount(&server)
        .await;

    let base_delay = Duration::from_millis(100);
    let h = harness(&server, base_delay);
    let mut job = job("storm", None);

    let started = Instant::now();
    let outcome = h
        .client
        .generate(&mut job, &RecordingListener::default(), &CancellationToken::new())
        .await;

    assert!(outcome.is_image());
    assert_eq!(txt2img_calls(&server).await, 3);
    // Two timed-out attempts plus backoff of base and 2 * base
    assert!(started.elapsed() >= Duration::from_secs(2) + base_delay * 3);

    let snapshot = h.breaker.snapshot();
    assert_eq!(snapshot.success_count, 1);
    assert_eq!(snapshot.failure_count, 0);
    assert_eq!(snapshot.state, CircuitState::Closed);
}

#[tokio::test]
async fn test_persistent_http_errors_yield_error_placeholder() {
    let server = MockServer::start().await;
    mount_progress(&server).await;
    Mock::given(method("POST"))
        .and(path(TXT2IMG))
        .respond_with(ResponseTemplate::new(500).set_body_string("CUDA out of memory"))
        .mount(&server)
        .await;

    let h = harness(&server, Duration::from_millis(1));
    let mut job = job("castle", None);
    let outcome = h
        .client
        .generate(&mut job, &RecordingListener::default(), &CancellationToken::new())
        .await;

    match outcome {
        GenerationOutcome::Placeholder { reason, url, error } => {
            assert_eq!(reason, PlaceholderKind::Error);
            assert_eq!(url, PlaceholderConfig::default().error_url);
            assert!(error.unwrap().contains("CUDA out of memory"));
        }
        other => panic!("expected placeholder, got {:?}", other),
    }
    assert_eq!(txt2img_calls(&server).await, 3);
    assert_eq!(h.breaker.snapshot().failure_count, 1);
}

#[tokio::test]
async fn test_empty_and_undecodable_payloads_are_errors() {
    let server = MockServer::start().await;
    mount_progress(&server).await;
    Mock::given(method("POST"))
        .and(path(TXT2IMG))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "images": [] })))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TXT2IMG))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "images": ["%%not-base64%%"] })))
        .mount(&server)
        .await;

    let h = harness(&server, Duration::from_millis(1));
    let mut job = job("forest", None);
    let outcome = h
        .client
        .generate(&mut job, &RecordingListener::default(), &CancellationToken::new())
        .await;

    match outcome {
        GenerationOutcome::Placeholder { reason, error, .. } => {
            assert_eq!(reason, PlaceholderKind::Error);
            assert!(error.unwrap().contains("decode"));
        }
        other => panic!("expected placeholder, got {:?}", other),
    }
    assert_eq!(txt2img_calls(&server).await, 3);
}

#[tokio::test]
async fn test_open_circuit_returns_maintenance_without_calling_backend() {
    let server = MockServer::start().await;
    let h = harness(&server, Duration::from_millis(1));
    for _ in 0..5 {
        h.breaker.record_failure(&"earlier failure");
    }

    let mut job = job("desert", None);
    let outcome = h
        .client
        .generate(&mut job, &RecordingListener::default(), &CancellationToken::new())
        .await;

    assert!(matches!(
        outcome,
        GenerationOutcome::Placeholder { reason: PlaceholderKind::Maintenance, .. }
    ));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_cancellation_stops_retries() {
    let server = MockServer::start().await;
    mount_progress(&server).await;
    Mock::given(method("POST"))
        .and(path(TXT2IMG))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let h = harness(&server, Duration::from_secs(30));
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    let mut job = job("river", None);
    let started = Instant::now();
    let outcome = h.client.generate(&mut job, &RecordingListener::default(), &token).await;

    assert!(!outcome.is_image());
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(txt2img_calls(&server).await, 1);
}

#[tokio::test]
async fn test_cancelled_token_skips_backend_and_breaker() {
    let server = MockServer::start().await;
    mount_progress(&server).await;
    let h = harness(&server, Duration::from_millis(1));
    let token = CancellationToken::new();
    token.cancel();

    let mut job = job("meadow", None);
    let outcome = h.client.generate(&mut job, &RecordingListener::default(), &token).await;

    assert!(!outcome.is_image());
    assert_eq!(txt2img_calls(&server).await, 0);
    let snapshot = h.breaker.snapshot();
    assert_eq!(snapshot.failure_count, 0);
    assert_eq!(snapshot.success_count, 0);
}
