use std::time::Duration;

use async_trait::async_trait;

use crate::domain::jobs::{EnqueueOptions, JobLane, JobStatus, VideoJob};
use crate::error::QueueError;

/// A job leased to a worker slot. The slot owns it until `complete` or
/// `fail` is called.
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub id: String,
    pub lane: JobLane,
    pub payload: VideoJob,
    /// 1-based attempt number of this delivery.
    pub attempt: u32,
}

/// What the queue decided after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Re-delivery scheduled after the lane's backoff.
    Retrying { attempt: u32, delay: Duration },
    /// Attempts exhausted; the job is permanently failed.
    Exhausted,
}

/// Durable at-least-once work queue with three independent lanes.
#[async_trait]
pub trait JobQueuePort: Send + Sync {
    /// Enqueue a job. The job id doubles as the dedupe key: re-enqueueing
    /// while a job with the same id is waiting, delayed or active is a
    /// no-op returning `false`. Completed and failed ids may be re-enqueued.
    async fn enqueue(
        &self,
        lane: JobLane,
        job: VideoJob,
        opts: EnqueueOptions,
    ) -> Result<bool, QueueError>;

    /// Lease the next job, blocking up to `timeout_secs` (backend
    /// permitting). Returns `None` on timeout.
    async fn dequeue(&self, lane: JobLane, timeout_secs: f64)
        -> Result<Option<LeasedJob>, QueueError>;

    async fn complete(&self, job: &LeasedJob) -> Result<(), QueueError>;

    /// Record a failed attempt: schedules a delayed retry or fails the job
    /// permanently once the lane's attempts are exhausted.
    async fn fail(&self, job: &LeasedJob, error: &str) -> Result<FailureOutcome, QueueError>;

    /// Best-effort progress reporting for status polling.
    async fn set_progress(&self, lane: JobLane, job_id: &str, progress: u8)
        -> Result<(), QueueError>;

    async fn status(&self, lane: JobLane, job_id: &str) -> Result<Option<JobStatus>, QueueError>;

    /// Remove a job that has not started yet. Active jobs are not
    /// cancellable; returns `false` for them.
    async fn cancel(&self, lane: JobLane, job_id: &str) -> Result<bool, QueueError>;
}
