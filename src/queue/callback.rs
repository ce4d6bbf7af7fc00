//! Completion delivery that cannot take down the worker loop
//!
//! A handler that errors or panics is retried with exponential backoff. Once
//! attempts run out the failure is recorded in a bounded history for
//! operators and `false` is returned.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{error, warn};

use crate::config::CallbackConfig;
use crate::error::AppError;
use crate::queue::job::{CompletionHandler, GenerationOutcome};

const RESULT_PREVIEW_CHARS: usize = 200;

/// A delivery that exhausted its attempts
#[derive(Debug, Clone, Serialize)]
pub struct CallbackFailure {
    pub job_id: String,
    pub result_preview: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
    pub context: Option<String>,
}

pub struct SafeCallbackExecutor {
    max_retries: u32,
    retry_delay: Duration,
    history_limit: usize,
    failures: Mutex<VecDeque<CallbackFailure>>,
    total_failures: AtomicU64,
}

impl SafeCallbackExecutor {
    /// `max_retries` is the total number of invocations attempted (at least one).
    pub fn new(max_retries: u32, retry_delay: Duration, history_limit: usize) -> Self {
        Self {
            max_retries: max_retries.max(1),
            retry_delay,
            history_limit,
            failures: Mutex::new(VecDeque::new()),
            total_failures: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CallbackConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.retry_delay_ms),
            config.history_limit,
        )
    }

    /// Deliver `outcome` to `handler`. Never panics and never returns an error.
    pub async fn execute(
        &self,
        handler: &dyn CompletionHandler,
        outcome: &GenerationOutcome,
        job_id: &str,
        context: Option<&str>,
    ) -> bool {
        let mut last_error = String::new();

        for attempt in 0..self.max_retries {
            let call = AssertUnwindSafe(handler.on_complete(job_id, outcome)).catch_unwind();
            match call.await {
                Ok(Ok(())) => return true,
                Ok(Err(e)) => last_error = format!("{:#}", e),
                Err(panic) => last_error = panic_message(panic.as_ref()),
            }

            warn!(
                job_id = %job_id,
                attempt = attempt + 1,
                max_attempts = self.max_retries,
                error = %last_error,
                "Completion handler failed"
            );

            if attempt + 1 < self.max_retries {
                tokio::time::sleep(self.retry_delay.saturating_mul(2u32.saturating_pow(attempt))).await;
            }
        }

        let failure = AppError::CallbackDelivery {
            job_id: job_id.to_string(),
            reason: last_error.clone(),
        };
        error!(job_id = %job_id, context = context.unwrap_or(""), error = %failure, "Giving up on completion handler");
        self.record(CallbackFailure {
            job_id: job_id.to_string(),
            result_preview: preview(outcome),
            error: last_error,
            timestamp: Utc::now(),
            context: context.map(String::from),
        });
        false
    }

    /// Most recent failures, oldest first
    pub fn failures(&self) -> Vec<CallbackFailure> {
        self.failures.lock().iter().cloned().collect()
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    fn record(&self, failure: CallbackFailure) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let mut failures = self.failures.lock();
        failures.push_back(failure);
        while failures.len() > self.history_limit {
            failures.pop_front();
        }
    }
}

fn preview(outcome: &GenerationOutcome) -> String {
    let text = serde_json::to_string(outcome).unwrap_or_else(|_| outcome.image_url().to_string());
    text.chars().take(RESULT_PREVIEW_CHARS).collect()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}
