//! In-memory implementations of the queue, repositories and entitlement
//! port. Back the monolith deployment and the service tests; semantics
//! mirror the Redis adapters.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::jobs::{
    EnqueueOptions, JobLane, JobState, JobStatus, Priority, VideoJob,
};
use crate::domain::token::AccessToken;
use crate::domain::video::{
    EncryptionKey, ProcessingStatus, Thumbnail, VideoAsset, VideoMetadata,
};
use crate::error::{QueueError, RepoError};
use crate::ports::entitlement::EntitlementPort;
use crate::ports::queue::{FailureOutcome, JobQueuePort, LeasedJob};
use crate::ports::repository::{TokenRepository, VideoRepository};

#[derive(Debug)]
struct JobRecord {
    payload: VideoJob,
    state: JobState,
    attempts: u32,
    progress: u8,
    error: Option<String>,
}

#[derive(Default)]
struct LaneState {
    ready: VecDeque<String>,
    high: VecDeque<String>,
    delayed: Vec<(String, Instant)>,
    jobs: HashMap<String, JobRecord>,
}

#[derive(Clone, Default)]
pub struct MemoryQueue {
    lanes: Arc<Mutex<HashMap<JobLane, LaneState>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_lease(&self, lane: JobLane) -> Option<LeasedJob> {
        let mut lanes = self.lanes.lock().unwrap();
        let state = lanes.entry(lane).or_default();

        // Promote delayed jobs whose backoff has elapsed.
        let now = Instant::now();
        let delayed: Vec<(String, Instant)> = state.delayed.drain(..).collect();
        for (id, ready_at) in delayed {
            if ready_at <= now {
                if let Some(record) = state.jobs.get_mut(&id) {
                    record.state = JobState::Waiting;
                }
                state.ready.push_back(id);
            } else {
                state.delayed.push((id, ready_at));
            }
        }

        let id = state.high.pop_front().or_else(|| state.ready.pop_front())?;
        let record = state.jobs.get_mut(&id)?;
        record.state = JobState::Active;
        Some(LeasedJob {
            id: id.clone(),
            lane,
            payload: record.payload.clone(),
            attempt: record.attempts + 1,
        })
    }
}

#[async_trait]
impl JobQueuePort for MemoryQueue {
    async fn enqueue(
        &self,
        lane: JobLane,
        job: VideoJob,
        opts: EnqueueOptions,
    ) -> Result<bool, QueueError> {
        let mut lanes = self.lanes.lock().unwrap();
        let state = lanes.entry(lane).or_default();
        let id = job.job_id(lane);
        if let Some(existing) = state.jobs.get(&id) {
            if matches!(
                existing.state,
                JobState::Waiting | JobState::Active | JobState::Delayed
            ) {
                return Ok(false);
            }
        }
        state.jobs.insert(
            id.clone(),
            JobRecord {
                payload: job,
                state: JobState::Waiting,
                attempts: 0,
                progress: 0,
                error: None,
            },
        );
        match opts.priority {
            Priority::High => state.high.push_back(id),
            Priority::Normal => state.ready.push_back(id),
        }
        Ok(true)
    }

    async fn dequeue(
        &self,
        lane: JobLane,
        timeout_secs: f64,
    ) -> Result<Option<LeasedJob>, QueueError> {
        if let Some(job) = self.try_lease(lane) {
            return Ok(Some(job));
        }
        if timeout_secs > 0.0 {
            let wait = std::time::Duration::from_secs_f64(timeout_secs.min(0.05));
            tokio::time::sleep(wait).await;
            return Ok(self.try_lease(lane));
        }
        Ok(None)
    }

    async fn complete(&self, job: &LeasedJob) -> Result<(), QueueError> {
        let mut lanes = self.lanes.lock().unwrap();
        let state = lanes.entry(job.lane).or_default();
        if let Some(record) = state.jobs.get_mut(&job.id) {
            record.state = JobState::Completed;
            record.progress = 100;
        }
        Ok(())
    }

    async fn fail(&self, job: &LeasedJob, error: &str) -> Result<FailureOutcome, QueueError> {
        let mut lanes = self.lanes.lock().unwrap();
        let state = lanes.entry(job.lane).or_default();
        let Some(record) = state.jobs.get_mut(&job.id) else {
            return Err(QueueError::Backend(format!("unknown job {}", job.id)));
        };
        record.attempts += 1;
        record.error = Some(error.to_string());

        let policy = job.lane.retry_policy();
        if record.attempts < policy.max_attempts {
            let delay = policy.delay_after(record.attempts);
            record.state = JobState::Delayed;
            state.delayed.push((job.id.clone(), Instant::now() + delay));
            Ok(FailureOutcome::Retrying {
                attempt: record.attempts,
                delay,
            })
        } else {
            record.state = JobState::Failed;
            Ok(FailureOutcome::Exhausted)
        }
    }

    async fn set_progress(
        &self,
        lane: JobLane,
        job_id: &str,
        progress: u8,
    ) -> Result<(), QueueError> {
        let mut lanes = self.lanes.lock().unwrap();
        let state = lanes.entry(lane).or_default();
        if let Some(record) = state.jobs.get_mut(job_id) {
            record.progress = progress.min(100);
        }
        Ok(())
    }

    async fn status(&self, lane: JobLane, job_id: &str) -> Result<Option<JobStatus>, QueueError> {
        let lanes = self.lanes.lock().unwrap();
        Ok(lanes.get(&lane).and_then(|state| {
            state.jobs.get(job_id).map(|record| JobStatus {
                state: record.state,
                progress: record.progress,
                attempts: record.attempts,
                failure: record.error.clone(),
            })
        }))
    }

    async fn cancel(&self, lane: JobLane, job_id: &str) -> Result<bool, QueueError> {
        let mut lanes = self.lanes.lock().unwrap();
        let state = lanes.entry(lane).or_default();
        let waiting = state
            .jobs
            .get(job_id)
            .map(|record| record.state == JobState::Waiting)
            .unwrap_or(false);
        if !waiting {
            return Ok(false);
        }
        state.ready.retain(|id| id != job_id);
        state.high.retain(|id| id != job_id);
        state.jobs.remove(job_id);
        Ok(true)
    }
}

#[derive(Default)]
struct VideoStore {
    assets: HashMap<Uuid, VideoAsset>,
    thumbnails: HashMap<Uuid, Vec<Thumbnail>>,
}

#[derive(Clone, Default)]
pub struct MemoryVideoRepository {
    inner: Arc<Mutex<VideoStore>>,
}

impl MemoryVideoRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(
        &self,
        video_id: &Uuid,
        f: impl FnOnce(&mut VideoAsset),
    ) -> Result<(), RepoError> {
        let mut inner = self.inner.lock().unwrap();
        let asset = inner.assets.get_mut(video_id).ok_or(RepoError::NotFound)?;
        f(asset);
        Ok(())
    }
}

#[async_trait]
impl VideoRepository for MemoryVideoRepository {
    async fn create(&self, asset: &VideoAsset) -> Result<(), RepoError> {
        self.inner
            .lock()
            .unwrap()
            .assets
            .insert(asset.id, asset.clone());
        Ok(())
    }

    async fn get(&self, video_id: &Uuid) -> Result<Option<VideoAsset>, RepoError> {
        Ok(self.inner.lock().unwrap().assets.get(video_id).cloned())
    }

    async fn mark_processing(&self, video_id: &Uuid) -> Result<(), RepoError> {
        self.update(video_id, |asset| {
            asset.status = ProcessingStatus::Processing;
            asset.progress = 0;
            asset.error = None;
        })
    }

    async fn set_progress(&self, video_id: &Uuid, progress: u8) -> Result<(), RepoError> {
        self.update(video_id, |asset| asset.progress = progress.min(100))
    }

    async fn mark_completed(
        &self,
        video_id: &Uuid,
        master_url: &str,
        rendition_urls: &std::collections::BTreeMap<crate::domain::quality::Quality, String>,
        at: DateTime<Utc>,
    ) -> Result<(), RepoError> {
        self.update(video_id, |asset| {
            asset.status = ProcessingStatus::Completed;
            asset.progress = 100;
            asset.error = None;
            asset.hls_master_url = Some(master_url.to_string());
            asset.rendition_urls = rendition_urls.clone();
            asset.completed_at = Some(at);
        })
    }

    async fn mark_failed(&self, video_id: &Uuid, error: &str) -> Result<(), RepoError> {
        self.update(video_id, |asset| {
            asset.status = ProcessingStatus::Failed;
            asset.error = Some(error.to_string());
        })
    }

    async fn set_encryption_key(
        &self,
        video_id: &Uuid,
        key: &EncryptionKey,
        rotation_at: DateTime<Utc>,
    ) -> Result<(), RepoError> {
        self.update(video_id, |asset| {
            asset.encryption = Some(key.clone());
            asset.key_rotation_at = Some(rotation_at);
        })
    }

    async fn update_metadata(
        &self,
        video_id: &Uuid,
        metadata: &VideoMetadata,
    ) -> Result<(), RepoError> {
        self.update(video_id, |asset| asset.metadata = Some(metadata.clone()))
    }

    async fn put_thumbnails(
        &self,
        video_id: &Uuid,
        thumbnails: &[Thumbnail],
    ) -> Result<(), RepoError> {
        self.inner
            .lock()
            .unwrap()
            .thumbnails
            .insert(*video_id, thumbnails.to_vec());
        Ok(())
    }

    async fn thumbnails(&self, video_id: &Uuid) -> Result<Vec<Thumbnail>, RepoError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .thumbnails
            .get(video_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete(&self, video_id: &Uuid) -> Result<(), RepoError> {
        let mut inner = self.inner.lock().unwrap();
        inner.assets.remove(video_id);
        inner.thumbnails.remove(video_id);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryTokenRepository {
    inner: Arc<Mutex<HashMap<String, AccessToken>>>,
}

impl MemoryTokenRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored row, in no particular order.
    pub fn all(&self) -> Vec<AccessToken> {
        self.inner.lock().unwrap().values().cloned().collect()
    }

    /// Force every row's expiry; lets tests exercise the row-side expiry
    /// check independently of the signed wrapper.
    pub fn age_out_all(&self, expires_at: DateTime<Utc>) {
        for token in self.inner.lock().unwrap().values_mut() {
            token.expires_at = expires_at;
        }
    }
}

#[async_trait]
impl TokenRepository for MemoryTokenRepository {
    async fn insert(&self, token: &AccessToken) -> Result<(), RepoError> {
        self.inner
            .lock()
            .unwrap()
            .insert(token.token_id.clone(), token.clone());
        Ok(())
    }

    async fn find(&self, token_id: &str) -> Result<Option<AccessToken>, RepoError> {
        Ok(self.inner.lock().unwrap().get(token_id).cloned())
    }

    async fn record_access(&self, token_id: &str, at: DateTime<Utc>) -> Result<(), RepoError> {
        let mut inner = self.inner.lock().unwrap();
        let token = inner.get_mut(token_id).ok_or(RepoError::NotFound)?;
        token.access_count += 1;
        token.last_accessed_at = Some(at);
        Ok(())
    }

    async fn revoke(&self, token_id: &str) -> Result<bool, RepoError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.get_mut(token_id) {
            Some(token) => {
                token.is_revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_all_for_video(&self, video_id: &Uuid) -> Result<u64, RepoError> {
        let mut count = 0;
        for token in self.inner.lock().unwrap().values_mut() {
            if token.video_id == *video_id && !token.is_revoked {
                token.is_revoked = true;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn revoke_all_for_user(&self, user_id: &Uuid) -> Result<u64, RepoError> {
        let mut count = 0;
        for token in self.inner.lock().unwrap().values_mut() {
            if token.user_id == *user_id && !token.is_revoked {
                token.is_revoked = true;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, RepoError> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.len();
        inner.retain(|_, token| token.expires_at > now);
        Ok((before - inner.len()) as u64)
    }

    async fn delete_all_for_video(&self, video_id: &Uuid) -> Result<u64, RepoError> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.len();
        inner.retain(|_, token| token.video_id != *video_id);
        Ok((before - inner.len()) as u64)
    }
}

/// Fixed entitlement table for local runs and tests.
#[derive(Clone, Default)]
pub struct StaticEntitlements {
    granted: Arc<Mutex<HashSet<(Uuid, Uuid)>>>,
    free_chapters: Arc<Mutex<HashSet<Uuid>>>,
}

impl StaticEntitlements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, user_id: Uuid, course_id: Uuid) {
        self.granted.lock().unwrap().insert((user_id, course_id));
    }

    pub fn mark_free(&self, chapter_id: Uuid) {
        self.free_chapters.lock().unwrap().insert(chapter_id);
    }
}

#[async_trait]
impl EntitlementPort for StaticEntitlements {
    async fn has_access(&self, user_id: &Uuid, course_id: &Uuid) -> Result<bool, RepoError> {
        Ok(self
            .granted
            .lock()
            .unwrap()
            .contains(&(*user_id, *course_id)))
    }

    async fn is_chapter_free(&self, chapter_id: &Uuid) -> Result<bool, RepoError> {
        Ok(self.free_chapters.lock().unwrap().contains(chapter_id))
    }
}
