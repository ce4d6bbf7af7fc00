//! Read-side index of in-flight jobs for polling clients
//!
//! This is a liveness cache, not a source of truth. It is written by the job
//! queue and lost on restart.

use dashmap::DashMap;
use serde::Serialize;

use crate::notify::JobStatus;

/// Polling projection of a job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingJobRecord {
    pub job_id: String,
    pub owner: String,
    pub conversation_id: String,
    pub status: JobStatus,
    pub queue_position: u32,
    pub progress: u8,
}

#[derive(Default)]
pub struct PendingJobRegistry {
    records: DashMap<String, PendingJobRecord>,
}

impl PendingJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job_id: &str, owner: &str, conversation_id: &str, queue_position: u32) {
        self.records.insert(
            job_id.to_string(),
            PendingJobRecord {
                job_id: job_id.to_string(),
                owner: owner.to_string(),
                conversation_id: conversation_id.to_string(),
                status: JobStatus::Queued,
                queue_position,
                progress: 0,
            },
        );
    }

    /// Update progress (clamped to 100) and/or queue position. Unknown ids are ignored.
    pub fn update_progress(&self, job_id: &str, progress: Option<u8>, queue_position: Option<u32>) {
        if let Some(mut record) = self.records.get_mut(job_id) {
            if let Some(progress) = progress {
                record.progress = progress.min(100);
            }
            if let Some(position) = queue_position {
                record.queue_position = position;
            }
        }
    }

    pub fn mark_processing(&self, job_id: &str) {
        if let Some(mut record) = self.records.get_mut(job_id) {
            record.status = JobStatus::Processing;
        }
    }

    pub fn remove(&self, job_id: &str) -> Option<PendingJobRecord> {
        self.records.remove(job_id).map(|(_, record)| record)
    }

    /// Records owned by `owner`, in submission order
    pub fn list_for(&self, owner: &str) -> Vec<PendingJobRecord> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .filter(|entry| entry.owner == owner)
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|r| r.queue_position);
        records
    }

    pub fn get(&self, job_id: &str) -> Option<PendingJobRecord> {
        self.records.get(job_id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
