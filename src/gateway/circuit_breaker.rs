//! Circuit breaker guarding the external image backend
//!
//! ```text
//! CLOSED --(failure_threshold consecutive failures)--> OPEN
//! OPEN   --(timeout elapsed, on next can_attempt)----> HALF_OPEN
//! HALF_OPEN --(success)--> CLOSED
//! HALF_OPEN --(failure)--> OPEN
//! ```
//!
//! Timestamps use [`tokio::time::Instant`] so a paused test clock drives
//! the cool-down.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::CircuitBreakerConfig;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
    last_success_at: Option<Instant>,
    last_state_change_at: Instant,
}

/// Point-in-time view of the breaker for operators
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub failure_threshold: u32,
    pub timeout_secs: u64,
    pub secs_since_last_failure: Option<u64>,
    pub secs_since_last_success: Option<u64>,
    pub secs_since_state_change: u64,
}

/// Circuit breaker for a single protected backend
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            timeout,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_at: None,
                last_success_at: None,
                last_state_change_at: Instant::now(),
            }),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self::new(
            name,
            config.failure_threshold,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Whether a call may go through right now.
    ///
    /// An OPEN circuit whose cool-down has elapsed moves to HALF_OPEN here and
    /// admits exactly this one probe.
    pub fn can_attempt(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => false,
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure_at
                    .map(|at| at.elapsed() >= self.timeout)
                    .unwrap_or(true);
                if cooled_down {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.success_count = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        inner.success_count += 1;
        inner.last_success_at = Some(Instant::now());
        if inner.state == CircuitState::HalfOpen {
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    pub fn record_failure(&self, error: &dyn fmt::Display) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure_at = Some(Instant::now());

        warn!(
            circuit = %self.name,
            state = %inner.state,
            failures = inner.failure_count,
            error = %error,
            "Backend failure recorded"
        );

        match inner.state {
            CircuitState::HalfOpen => self.transition(&mut inner, CircuitState::Open),
            CircuitState::Closed if inner.failure_count >= self.failure_threshold => {
                self.transition(&mut inner, CircuitState::Open)
            }
            _ => {}
        }
    }

    /// Force CLOSED with zeroed counters
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        inner.success_count = 0;
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
        info!(circuit = %self.name, "Circuit manually reset");
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            failure_threshold: self.failure_threshold,
            timeout_secs: self.timeout.as_secs(),
            secs_since_last_failure: inner.last_failure_at.map(|at| at.elapsed().as_secs()),
            secs_since_last_success: inner.last_success_at.map(|at| at.elapsed().as_secs()),
            secs_since_state_change: inner.last_state_change_at.elapsed().as_secs(),
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.last_state_change_at = Instant::now();
        match to {
            CircuitState::Open => {
                inner.success_count = 0;
                warn!(circuit = %self.name, from = %from, to = %to, failures = inner.failure_count, "Circuit opened");
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
                info!(circuit = %self.name, from = %from, to = %to, "Circuit closed");
            }
            CircuitState::HalfOpen => {
                info!(circuit = %self.name, from = %from, to = %to, "Circuit half-open, probing backend");
            }
        }
    }
}
