//! Final outcomes of jobs submitted over HTTP
//!
//! HTTP submitters have no message store to receive the completion, so their
//! jobs complete into this cache and the polling endpoint reads it back once
//! the pending record is gone.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::queue::job::{CompletionHandler, GenerationOutcome};

const DEFAULT_CAPACITY: usize = 1000;

pub struct OutcomeCache {
    capacity: usize,
    outcomes: DashMap<String, GenerationOutcome>,
    order: Mutex<VecDeque<String>>,
}

impl OutcomeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            outcomes: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
        }
    }

    pub fn get(&self, job_id: &str) -> Option<GenerationOutcome> {
        self.outcomes.get(job_id).map(|o| o.clone())
    }

    pub fn insert(&self, job_id: &str, outcome: GenerationOutcome) {
        let mut order = self.order.lock();
        if self.outcomes.insert(job_id.to_string(), outcome).is_none() {
            order.push_back(job_id.to_string());
        }
        while order.len() > self.capacity {
            if let Some(evicted) = order.pop_front() {
                self.outcomes.remove(&evicted);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

impl Default for OutcomeCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl CompletionHandler for OutcomeCache {
    async fn on_complete(&self, job_id: &str, outcome: &GenerationOutcome) -> anyhow::Result<()> {
        self.insert(job_id, outcome.clone());
        Ok(())
    }
}
