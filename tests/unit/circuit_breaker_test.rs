//! Unit tests for the circuit breaker state machine

use image_job_scheduler::gateway::{CircuitBreaker, CircuitState};
use std::time::Duration;

fn breaker() -> CircuitBreaker {
    CircuitBreaker::new("txt2img", 3, Duration::from_secs(60))
}

fn trip(breaker: &CircuitBreaker) {
    for _ in 0..3 {
        breaker.record_failure(&"backend down");
    }
}

#[tokio::test(start_paused = true)]
async fn test_opens_after_threshold_failures() {
    let breaker = breaker();

    breaker.record_failure(&"first");
    breaker.record_failure(&"second");
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(breaker.can_attempt());

    breaker.record_failure(&"third");
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!breaker.can_attempt());
}

#[tokio::test(start_paused = true)]
async fn test_success_resets_consecutive_failures() {
    let breaker = breaker();

    breaker.record_failure(&"a");
    breaker.record_failure(&"b");
    breaker.record_success();
    breaker.record_failure(&"c");
    breaker.record_failure(&"d");

    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.snapshot().failure_count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_admits_single_probe_after_timeout() {
    let breaker = breaker();
    trip(&breaker);

    tokio::time::advance(Duration::from_secs(59)).await;
    assert!(!breaker.can_attempt());
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(breaker.can_attempt());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    // The probe is outstanding; nothing else gets through
    assert!(!breaker.can_attempt());
    assert!(!breaker.can_attempt());
}

#[tokio::test(start_paused = true)]
async fn test_half_open_failure_reopens() {
    let breaker = breaker();
    trip(&breaker);
    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(breaker.can_attempt());

    breaker.record_failure(&"probe failed");

    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!breaker.can_attempt());

    // The cool-down restarts from the probe failure
    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(!breaker.can_attempt());
    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(breaker.can_attempt());
}

#[tokio::test(start_paused = true)]
async fn test_half_open_success_closes() {
    let breaker = breaker();
    trip(&breaker);
    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(breaker.can_attempt());

    breaker.record_success();

    let snapshot = breaker.snapshot();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.failure_count, 0);
    assert_eq!(snapshot.success_count, 1);
    assert!(breaker.can_attempt());
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_serializes_state_names() {
    let breaker = breaker();
    trip(&breaker);

    let value = serde_json::to_value(breaker.snapshot()).unwrap();
    assert_eq!(value["state"], "OPEN");
    assert_eq!(value["name"], "txt2img");
    assert_eq!(value["failure_threshold"], 3);
    assert_eq!(value["timeout_secs"], 60);

    tokio::time::advance(Duration::from_secs(60)).await;
    breaker.can_attempt();
    let value = serde_json::to_value(breaker.snapshot()).unwrap();
    assert_eq!(value["state"], "HALF_OPEN");
}
