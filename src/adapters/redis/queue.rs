//! Redis JobQueuePort implementation.
//!
//! Per lane: a ready list, a high-priority list, a delayed zset scored by
//! ready-at millis, and one state hash per job id.

use async_trait::async_trait;
use chrono::Utc;
use deadpool_redis::redis::AsyncCommands;

use super::pool::RedisPool;
use crate::domain::jobs::{
    EnqueueOptions, JobLane, JobState, JobStatus, Priority, VideoJob,
};
use crate::error::QueueError;
use crate::ports::queue::{FailureOutcome, JobQueuePort, LeasedJob};

fn ready_key(lane: JobLane) -> String {
    format!("jobs:{lane}:ready")
}

fn high_key(lane: JobLane) -> String {
    format!("jobs:{lane}:ready:high")
}

fn delayed_key(lane: JobLane) -> String {
    format!("jobs:{lane}:delayed")
}

fn job_key(lane: JobLane, job_id: &str) -> String {
    format!("jobs:{lane}:job:{job_id}")
}

fn parse_state(raw: &str) -> Result<JobState, QueueError> {
    match raw {
        "waiting" => Ok(JobState::Waiting),
        "active" => Ok(JobState::Active),
        "completed" => Ok(JobState::Completed),
        "failed" => Ok(JobState::Failed),
        "delayed" => Ok(JobState::Delayed),
        other => Err(QueueError::Backend(format!("unknown job state {other}"))),
    }
}

fn state_str(state: JobState) -> &'static str {
    match state {
        JobState::Waiting => "waiting",
        JobState::Active => "active",
        JobState::Completed => "completed",
        JobState::Failed => "failed",
        JobState::Delayed => "delayed",
    }
}

#[async_trait]
impl JobQueuePort for RedisPool {
    async fn enqueue(
        &self,
        lane: JobLane,
        job: VideoJob,
        opts: EnqueueOptions,
    ) -> Result<bool, QueueError> {
        let mut conn = self.pool.get().await.map_err(QueueError::from)?;
        let id = job.job_id(lane);
        let jk = job_key(lane, &id);

        // Dedupe: a live job with this id wins over the new enqueue.
        let state: Option<String> = conn.hget(&jk, "state").await.map_err(QueueError::from)?;
        if matches!(
            state.as_deref(),
            Some("waiting") | Some("active") | Some("delayed")
        ) {
            return Ok(false);
        }

        let payload = serde_json::to_string(&job)?;
        conn.del::<_, ()>(&jk).await.map_err(QueueError::from)?;
        conn.hset_multiple::<_, _, _, ()>(
            &jk,
            &[
                ("payload", payload.as_str()),
                ("state", state_str(JobState::Waiting)),
                ("attempts", "0"),
                ("progress", "0"),
            ],
        )
        .await
        .map_err(QueueError::from)?;

        let list = match opts.priority {
            Priority::High => high_key(lane),
            Priority::Normal => ready_key(lane),
        };
        conn.lpush::<_, _, ()>(&list, &id)
            .await
            .map_err(QueueError::from)?;
        Ok(true)
    }

    async fn dequeue(
        &self,
        lane: JobLane,
        timeout_secs: f64,
    ) -> Result<Option<LeasedJob>, QueueError> {
        let mut conn = self.pool.get().await.map_err(QueueError::from)?;

        // Promote delayed jobs whose backoff has elapsed.
        let now_ms = Utc::now().timestamp_millis();
        let due: Vec<String> = conn
            .zrangebyscore(delayed_key(lane), 0i64, now_ms)
            .await
            .map_err(QueueError::from)?;
        for id in due {
            let removed: i64 = conn
                .zrem(delayed_key(lane), &id)
                .await
                .map_err(QueueError::from)?;
            if removed > 0 {
                conn.hset::<_, _, _, ()>(&job_key(lane, &id), "state", state_str(JobState::Waiting))
                    .await
                    .map_err(QueueError::from)?;
                conn.lpush::<_, _, ()>(&ready_key(lane), &id)
                    .await
                    .map_err(QueueError::from)?;
            }
        }

        // High priority first (non-blocking), then block on the normal list.
        let id: Option<String> = conn
            .rpop(&high_key(lane), None)
            .await
            .map_err(QueueError::from)?;
        let id = match id {
            Some(id) => Some(id),
            None => {
                let result: Option<(String, String)> = conn
                    .brpop(&ready_key(lane), timeout_secs)
                    .await
                    .map_err(QueueError::from)?;
                result.map(|(_, id)| id)
            }
        };
        let Some(id) = id else { return Ok(None) };

        let jk = job_key(lane, &id);
        let payload: Option<String> = conn.hget(&jk, "payload").await.map_err(QueueError::from)?;
        let Some(payload) = payload else {
            // Job hash vanished (cancelled between push and pop).
            return Ok(None);
        };
        let attempts: u32 = conn
            .hget::<_, _, Option<u32>>(&jk, "attempts")
            .await
            .map_err(QueueError::from)?
            .unwrap_or(0);
        conn.hset::<_, _, _, ()>(&jk, "state", state_str(JobState::Active))
            .await
            .map_err(QueueError::from)?;

        Ok(Some(LeasedJob {
            payload: serde_json::from_str(&payload)?,
            id,
            lane,
            attempt: attempts + 1,
        }))
    }

    async fn complete(&self, job: &LeasedJob) -> Result<(), QueueError> {
        let mut conn = self.pool.get().await.map_err(QueueError::from)?;
        conn.hset_multiple::<_, _, _, ()>(
            &job_key(job.lane, &job.id),
            &[("state", state_str(JobState::Completed)), ("progress", "100")],
        )
        .await
        .map_err(QueueError::from)?;
        Ok(())
    }

    async fn fail(&self, job: &LeasedJob, error: &str) -> Result<FailureOutcome, QueueError> {
        let mut conn = self.pool.get().await.map_err(QueueError::from)?;
        let jk = job_key(job.lane, &job.id);
        let attempts: u32 = conn
            .hincr(&jk, "attempts", 1i64)
            .await
            .map_err(QueueError::from)?;
        conn.hset::<_, _, _, ()>(&jk, "error", error)
            .await
            .map_err(QueueError::from)?;

        let policy = job.lane.retry_policy();
        if attempts < policy.max_attempts {
            let delay = policy.delay_after(attempts);
            let ready_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
            conn.hset::<_, _, _, ()>(&jk, "state", state_str(JobState::Delayed))
                .await
                .map_err(QueueError::from)?;
            conn.zadd::<_, _, _, ()>(&delayed_key(job.lane), &job.id, ready_at)
                .await
                .map_err(QueueError::from)?;
            Ok(FailureOutcome::Retrying {
                attempt: attempts,
                delay,
            })
        } else {
            conn.hset::<_, _, _, ()>(&jk, "state", state_str(JobState::Failed))
                .await
                .map_err(QueueError::from)?;
            Ok(FailureOutcome::Exhausted)
        }
    }

    async fn set_progress(
        &self,
        lane: JobLane,
        job_id: &str,
        progress: u8,
    ) -> Result<(), QueueError> {
        let mut conn = self.pool.get().await.map_err(QueueError::from)?;
        conn.hset::<_, _, _, ()>(
            &job_key(lane, job_id),
            "progress",
            progress.min(100).to_string(),
        )
        .await
        .map_err(QueueError::from)?;
        Ok(())
    }

    async fn status(&self, lane: JobLane, job_id: &str) -> Result<Option<JobStatus>, QueueError> {
        let mut conn = self.pool.get().await.map_err(QueueError::from)?;
        let fields: std::collections::HashMap<String, String> = conn
            .hgetall(&job_key(lane, job_id))
            .await
            .map_err(QueueError::from)?;
        if fields.is_empty() {
            return Ok(None);
        }
        let state = parse_state(fields.get("state").map(String::as_str).unwrap_or(""))?;
        Ok(Some(JobStatus {
            state,
            progress: fields
                .get("progress")
                .and_then(|p| p.parse().ok())
                .unwrap_or(0),
            attempts: fields
                .get("attempts")
                .and_then(|a| a.parse().ok())
                .unwrap_or(0),
            failure: fields.get("error").cloned(),
        }))
    }

    async fn cancel(&self, lane: JobLane, job_id: &str) -> Result<bool, QueueError> {
        let mut conn = self.pool.get().await.map_err(QueueError::from)?;
        let jk = job_key(lane, job_id);
        let state: Option<String> = conn.hget(&jk, "state").await.map_err(QueueError::from)?;
        if state.as_deref() != Some("waiting") {
            return Ok(false);
        }
        let removed_normal: i64 = conn
            .lrem(&ready_key(lane), 0, job_id)
            .await
            .map_err(QueueError::from)?;
        let removed_high: i64 = conn
            .lrem(&high_key(lane), 0, job_id)
            .await
            .map_err(QueueError::from)?;
        if removed_normal + removed_high == 0 {
            return Ok(false);
        }
        conn.del::<_, ()>(&jk).await.map_err(QueueError::from)?;
        Ok(true)
    }
}
