//! Queue-owned job definitions: lanes, payloads, ids and retry policies.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The three independent delivery lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobLane {
    Transcode,
    Thumbnail,
    Metadata,
}

impl JobLane {
    pub fn as_str(self) -> &'static str {
        match self {
            JobLane::Transcode => "transcode",
            JobLane::Thumbnail => "thumbnail",
            JobLane::Metadata => "metadata",
        }
    }

    /// Lane-specific retry policy.
    pub fn retry_policy(self) -> RetryPolicy {
        match self {
            JobLane::Transcode => RetryPolicy {
                max_attempts: 3,
                backoff: Backoff::Exponential {
                    base: Duration::from_secs(2),
                },
            },
            JobLane::Thumbnail => RetryPolicy {
                max_attempts: 2,
                backoff: Backoff::Fixed(Duration::from_secs(5)),
            },
            JobLane::Metadata => RetryPolicy {
                max_attempts: 2,
                backoff: Backoff::Fixed(Duration::from_secs(5)),
            },
        }
    }
}

impl fmt::Display for JobLane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential { base: Duration },
}

impl RetryPolicy {
    /// Delay before re-delivery after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base } => base * 2u32.saturating_pow(attempt.saturating_sub(1)),
        }
    }
}

/// Payload shared by all three lanes: enough to locate the source and the
/// owning course/chapter for key generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoJob {
    pub video_id: Uuid,
    pub chapter_id: Uuid,
    pub course_id: Uuid,
    pub source_key: String,
    pub requested_by: Uuid,
}

impl VideoJob {
    /// Queue job id. Doubles as the dedupe key, so at most one live job per
    /// video exists in a lane at a time.
    pub fn job_id(&self, lane: JobLane) -> String {
        match lane {
            JobLane::Transcode => format!("video-{}", self.video_id),
            JobLane::Thumbnail => format!("thumbnail-{}", self.video_id),
            JobLane::Metadata => format!("metadata-{}", self.video_id),
        }
    }
}

/// Job lifecycle states reported by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

/// Snapshot returned by `JobQueuePort::status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    pub progress: u8,
    pub attempts: u32,
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    High,
    #[default]
    Normal,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueOptions {
    pub priority: Priority,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> VideoJob {
        VideoJob {
            video_id: Uuid::nil(),
            chapter_id: Uuid::nil(),
            course_id: Uuid::nil(),
            source_key: "key".into(),
            requested_by: Uuid::nil(),
        }
    }

    #[test]
    fn job_ids_follow_lane_prefixes() {
        let j = job();
        let id = j.video_id;
        assert_eq!(j.job_id(JobLane::Transcode), format!("video-{id}"));
        assert_eq!(j.job_id(JobLane::Thumbnail), format!("thumbnail-{id}"));
        assert_eq!(j.job_id(JobLane::Metadata), format!("metadata-{id}"));
    }

    #[test]
    fn transcode_backoff_doubles_from_two_seconds() {
        let policy = JobLane::Transcode.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
    }

    #[test]
    fn thumbnail_and_metadata_use_fixed_backoff() {
        for lane in [JobLane::Thumbnail, JobLane::Metadata] {
            let policy = lane.retry_policy();
            assert_eq!(policy.max_attempts, 2);
            assert_eq!(policy.delay_after(1), Duration::from_secs(5));
            assert_eq!(policy.delay_after(2), Duration::from_secs(5));
        }
    }

    #[test]
    fn payload_roundtrips_through_json() {
        let j = job();
        let json = serde_json::to_string(&j).unwrap();
        let back: VideoJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back, j);
    }
}
