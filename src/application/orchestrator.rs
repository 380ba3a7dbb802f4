//! Worker orchestration: leases jobs from the queue, sequences
//! download -> transcode -> upload -> record update, and keeps the video
//! row honest about what actually happened.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::engine::{TranscodeRequest, TranscodingEngine, VideoRef};
use crate::domain::jobs::{EnqueueOptions, JobLane, VideoJob};
use crate::domain::keys;
use crate::domain::quality::Quality;
use crate::domain::video::{EncryptionKey, ProcessingStatus, VideoAsset, VideoMetadata};
use crate::error::{PipelineError, StorageError};
use crate::ports::queue::{FailureOutcome, JobQueuePort, LeasedJob};
use crate::ports::repository::VideoRepository;
use crate::ports::storage::ObjectStorePort;

/// Days before a freshly generated segment key is due for rotation.
const KEY_ROTATION_DAYS: i64 = 7;

/// Snapshot for the status-polling endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingReport {
    pub status: ProcessingStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub hls_master_url: Option<String>,
}

impl From<&VideoAsset> for ProcessingReport {
    fn from(asset: &VideoAsset) -> Self {
        Self {
            status: asset.status,
            progress: asset.progress,
            error: asset.error.clone(),
            hls_master_url: asset.hls_master_url.clone(),
        }
    }
}

pub struct WorkerService<S, Q, R, E> {
    storage: S,
    queue: Q,
    repo: R,
    engine: E,
    thumbnail_interval_secs: u32,
    poll_secs: f64,
}

impl<S, Q, R, E> WorkerService<S, Q, R, E>
where
    S: ObjectStorePort + Clone + 'static,
    Q: JobQueuePort + Clone + 'static,
    R: VideoRepository + Clone + 'static,
    E: TranscodingEngine + 'static,
{
    pub fn new(
        storage: S,
        queue: Q,
        repo: R,
        engine: E,
        thumbnail_interval_secs: u32,
        poll_secs: f64,
    ) -> Self {
        Self {
            storage,
            queue,
            repo,
            engine,
            thumbnail_interval_secs,
            poll_secs,
        }
    }

    /// Validate the registered upload and enqueue its transcode job.
    /// Returns the job id; enqueueing twice while a job is live dedupes.
    pub async fn enqueue_transcode(
        &self,
        video_id: Uuid,
        chapter_id: Uuid,
        course_id: Uuid,
        source_key: String,
        requested_by: Uuid,
    ) -> Result<String, PipelineError> {
        let asset = self
            .repo
            .get(&video_id)
            .await?
            .ok_or(PipelineError::UnknownVideo(video_id))?;
        if !asset.mime_type.starts_with("video/") {
            return Err(PipelineError::InvalidUpload(format!(
                "unsupported content type {}",
                asset.mime_type
            )));
        }

        let job = VideoJob {
            video_id,
            chapter_id,
            course_id,
            source_key,
            requested_by,
        };
        let job_id = job.job_id(JobLane::Transcode);
        let accepted = self
            .queue
            .enqueue(JobLane::Transcode, job, EnqueueOptions::default())
            .await?;
        if !accepted {
            debug!(job = %job_id, "transcode already in flight, deduplicated");
        }
        Ok(job_id)
    }

    /// Polling surface for the processing endpoint.
    pub async fn processing_status(
        &self,
        video_id: &Uuid,
    ) -> Result<Option<ProcessingReport>, PipelineError> {
        Ok(self
            .repo
            .get(video_id)
            .await?
            .map(|asset| ProcessingReport::from(&asset)))
    }

    /// Run one lane forever. Spawn once per lane.
    pub async fn run_lane(&self, lane: JobLane) {
        info!(%lane, "worker lane started");
        loop {
            match self.process_next(lane, self.poll_secs).await {
                Ok(_) => {}
                Err(e) => {
                    error!(%lane, error = %e, "queue error");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Lease and handle at most one job. Returns whether a job was handled.
    pub async fn process_next(
        &self,
        lane: JobLane,
        timeout_secs: f64,
    ) -> Result<bool, PipelineError> {
        let Some(job) = self.queue.dequeue(lane, timeout_secs).await? else {
            return Ok(false);
        };
        self.handle(job).await;
        Ok(true)
    }

    async fn handle(&self, job: LeasedJob) {
        info!(job = %job.id, lane = %job.lane, attempt = job.attempt, "job started");
        let outcome = match job.lane {
            JobLane::Transcode => self.process_transcode(&job).await,
            JobLane::Thumbnail => self.process_thumbnails(&job).await,
            JobLane::Metadata => self.process_metadata(&job).await,
        };

        match outcome {
            Ok(()) => {
                if let Err(e) = self.queue.complete(&job).await {
                    error!(job = %job.id, error = %e, "failed to mark job complete");
                }
            }
            Err(err) => {
                let message = err.to_string();
                error!(job = %job.id, lane = %job.lane, error = %message, "job failed");

                // Only the transcode lane owns the video's processing
                // status; a metadata or thumbnail failure must not disturb
                // an already COMPLETED video.
                if job.lane == JobLane::Transcode {
                    if let Err(e) = self.repo.mark_failed(&job.payload.video_id, &message).await {
                        error!(video = %job.payload.video_id, error = %e, "failed to record failure");
                    }
                }

                match self.queue.fail(&job, &message).await {
                    Ok(FailureOutcome::Retrying { attempt, delay }) => {
                        warn!(job = %job.id, attempt, delay_secs = delay.as_secs(), "retry scheduled");
                    }
                    Ok(FailureOutcome::Exhausted) => {
                        error!(job = %job.id, "attempts exhausted, job permanently failed");
                    }
                    Err(e) => {
                        error!(job = %job.id, error = %e, "failed to record job failure");
                    }
                }
            }
        }
    }

    async fn process_transcode(&self, job: &LeasedJob) -> Result<(), PipelineError> {
        let video_id = job.payload.video_id;
        self.repo
            .get(&video_id)
            .await?
            .ok_or(PipelineError::UnknownVideo(video_id))?;

        self.repo.mark_processing(&video_id).await?;

        // Scratch space is dropped whichever way this returns.
        let scratch = tempfile::tempdir().map_err(StorageError::Io)?;
        let input = scratch.path().join("source");
        self.storage.download(&job.payload.source_key, &input).await?;

        // Fresh segment key per processing run; the rotation window starts
        // now.
        let key = EncryptionKey::generate();
        self.repo
            .set_encryption_key(&video_id, &key, Utc::now() + Duration::days(KEY_ROTATION_DAYS))
            .await?;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<u8>();
        let progress_repo = self.repo.clone();
        let progress_queue = self.queue.clone();
        let job_id = job.id.clone();
        let lane = job.lane;
        let drain = tokio::spawn(async move {
            // Best-effort side channel: clamp monotonically, swallow write
            // failures.
            let mut last = 0u8;
            while let Some(progress) = rx.recv().await {
                let progress = progress.min(100);
                if progress <= last {
                    continue;
                }
                last = progress;
                if let Err(e) = progress_repo.set_progress(&video_id, progress).await {
                    debug!(video = %video_id, error = %e, "progress update dropped");
                }
                let _ = progress_queue.set_progress(lane, &job_id, progress).await;
            }
        });

        let result = self
            .engine
            .transcode(TranscodeRequest {
                target: VideoRef {
                    video_id,
                    chapter_id: job.payload.chapter_id,
                    course_id: job.payload.course_id,
                },
                input,
                scratch_dir: scratch.path().to_path_buf(),
                encryption: Some(key),
                progress: Some(tx),
            })
            .await;
        let _ = drain.await;
        let set = result?;

        let rendition_urls: BTreeMap<Quality, String> = set
            .renditions
            .iter()
            .map(|r| (r.quality, r.playlist_url.clone()))
            .collect();
        self.repo
            .mark_completed(&video_id, &set.master_url, &rendition_urls, Utc::now())
            .await?;
        info!(video = %video_id, master = %set.master_url, "transcode completed");

        // Follow-on lanes retry independently of the finished transcode.
        let follow = job.payload.clone();
        self.queue
            .enqueue(JobLane::Thumbnail, follow.clone(), EnqueueOptions::default())
            .await?;
        self.queue
            .enqueue(JobLane::Metadata, follow, EnqueueOptions::default())
            .await?;
        Ok(())
    }

    async fn process_thumbnails(&self, job: &LeasedJob) -> Result<(), PipelineError> {
        let scratch = tempfile::tempdir().map_err(StorageError::Io)?;
        let input = scratch.path().join("source");
        self.storage.download(&job.payload.source_key, &input).await?;

        let thumbnails = self
            .engine
            .thumbnails(
                VideoRef {
                    video_id: job.payload.video_id,
                    chapter_id: job.payload.chapter_id,
                    course_id: job.payload.course_id,
                },
                &input,
                scratch.path(),
                self.thumbnail_interval_secs,
            )
            .await?;
        self.repo
            .put_thumbnails(&job.payload.video_id, &thumbnails)
            .await?;
        Ok(())
    }

    async fn process_metadata(&self, job: &LeasedJob) -> Result<(), PipelineError> {
        let scratch = tempfile::tempdir().map_err(StorageError::Io)?;
        let input = scratch.path().join("source");
        self.storage.download(&job.payload.source_key, &input).await?;

        let probe = self.engine.probe(&input).await?;
        let metadata = VideoMetadata {
            duration_secs: probe.duration_secs,
            width: probe.width,
            height: probe.height,
            codec: probe.codec,
            frame_rate: probe.frame_rate,
            bitrate_bps: probe.bitrate_bps,
        };
        self.repo
            .update_metadata(&job.payload.video_id, &metadata)
            .await?;
        Ok(())
    }

    /// Remove a video and everything it owns in storage and the repository.
    /// Token cleanup is the access token service's revocation cascade.
    pub async fn delete_video(&self, video_id: &Uuid) -> Result<(), PipelineError> {
        let asset = self
            .repo
            .get(video_id)
            .await?
            .ok_or(PipelineError::UnknownVideo(*video_id))?;

        for prefix in [
            keys::hls_prefix(&asset.course_id, &asset.chapter_id, video_id),
            keys::thumbnail_prefix(&asset.course_id, &asset.chapter_id, video_id),
        ] {
            for key in self.storage.list(&prefix).await? {
                self.storage.delete(&key).await?;
            }
        }
        self.storage.delete(&asset.storage_key).await?;
        self.repo.delete(video_id).await?;
        info!(video = %video_id, "video and derived assets deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::local::fs::FsStore;
    use crate::adapters::local::memory::{MemoryQueue, MemoryVideoRepository};
    use crate::application::engine::{Rendition, RenditionSet, SourceProbe};
    use crate::domain::jobs::JobState;
    use crate::domain::video::Thumbnail;
    use crate::error::TranscodeError;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    /// Scripted engine: succeeds with a canned rendition set, or fails.
    #[derive(Clone)]
    struct FakeEngine {
        fail_transcodes: Arc<AtomicBool>,
        fail_probe: Arc<AtomicBool>,
        transcodes: Arc<AtomicU32>,
    }

    impl FakeEngine {
        fn new() -> Self {
            Self {
                fail_transcodes: Arc::new(AtomicBool::new(false)),
                fail_probe: Arc::new(AtomicBool::new(false)),
                transcodes: Arc::new(AtomicU32::new(0)),
            }
        }

        fn probe() -> SourceProbe {
            SourceProbe {
                duration_secs: 60.0,
                width: 1280,
                height: 720,
                codec: "h264".into(),
                frame_rate: 30.0,
                bitrate_bps: Some(4_000_000),
            }
        }
    }

    #[async_trait]
    impl TranscodingEngine for FakeEngine {
        async fn probe(&self, _input: &Path) -> Result<SourceProbe, TranscodeError> {
            if self.fail_probe.load(Ordering::SeqCst) {
                return Err(TranscodeError::Probe("no such file".into()));
            }
            Ok(Self::probe())
        }

        async fn transcode(&self, req: TranscodeRequest) -> Result<RenditionSet, TranscodeError> {
            self.transcodes.fetch_add(1, Ordering::SeqCst);
            if self.fail_transcodes.load(Ordering::SeqCst) {
                return Err(TranscodeError::Encoder {
                    stage: "480p",
                    detail: "x264 exploded".into(),
                });
            }
            if let Some(tx) = &req.progress {
                let _ = tx.send(45);
                let _ = tx.send(90);
            }
            Ok(RenditionSet {
                master_key: "master-key".into(),
                master_url: "https://cdn.test/master/playlist.m3u8".into(),
                renditions: vec![
                    Rendition {
                        quality: Quality::Q480,
                        playlist_url: "https://cdn.test/480p/playlist.m3u8".into(),
                    },
                    Rendition {
                        quality: Quality::Q720,
                        playlist_url: "https://cdn.test/720p/playlist.m3u8".into(),
                    },
                ],
                source: Self::probe(),
            })
        }

        async fn thumbnails(
            &self,
            target: VideoRef,
            _input: &Path,
            _scratch_dir: &Path,
            interval_secs: u32,
        ) -> Result<Vec<Thumbnail>, TranscodeError> {
            Ok((0..6)
                .map(|n| Thumbnail {
                    video_id: target.video_id,
                    storage_key: format!("thumbs/thumb_{n}.jpg"),
                    url: format!("https://cdn.test/thumb_{n}.jpg"),
                    time_offset_secs: n * interval_secs,
                    width: 320,
                    height: 180,
                })
                .collect())
        }
    }

    struct Fixture {
        worker: WorkerService<FsStore, MemoryQueue, MemoryVideoRepository, FakeEngine>,
        queue: MemoryQueue,
        repo: MemoryVideoRepository,
        engine: FakeEngine,
        asset: VideoAsset,
        _store_dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let store_dir = tempfile::tempdir().unwrap();
        let storage = FsStore::new(store_dir.path(), "https://cdn.test");
        let queue = MemoryQueue::new();
        let repo = MemoryVideoRepository::new();
        let engine = FakeEngine::new();

        let asset = VideoAsset::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "lecture.mp4",
            1024,
            "video/mp4",
            "uploads/lecture.mp4",
        );
        repo.create(&asset).await.unwrap();
        // Seed the raw upload in the store.
        let src = store_dir.path().join("uploads");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("lecture.mp4"), b"raw").unwrap();

        let worker = WorkerService::new(
            storage,
            queue.clone(),
            repo.clone(),
            engine.clone(),
            10,
            0.01,
        );
        Fixture {
            worker,
            queue,
            repo,
            engine,
            asset,
            _store_dir: store_dir,
        }
    }

    async fn enqueue(f: &Fixture) -> String {
        f.worker
            .enqueue_transcode(
                f.asset.id,
                f.asset.chapter_id,
                f.asset.course_id,
                f.asset.storage_key.clone(),
                Uuid::new_v4(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn successful_transcode_completes_video_and_chains_jobs() {
        let f = fixture().await;
        let job_id = enqueue(&f).await;
        assert_eq!(job_id, format!("video-{}", f.asset.id));

        assert!(f.worker.process_next(JobLane::Transcode, 0.01).await.unwrap());

        let asset = f.repo.get(&f.asset.id).await.unwrap().unwrap();
        assert_eq!(asset.status, ProcessingStatus::Completed);
        assert_eq!(asset.progress, 100);
        assert!(asset.completed_at.is_some());
        assert_eq!(
            asset.hls_master_url.as_deref(),
            Some("https://cdn.test/master/playlist.m3u8")
        );
        assert_eq!(asset.rendition_urls.len(), 2);
        assert!(asset.encryption.is_some());
        assert!(asset.key_rotation_at.unwrap() > Utc::now());

        // Follow-on jobs landed in their lanes.
        let thumb = f
            .queue
            .status(JobLane::Thumbnail, &format!("thumbnail-{}", f.asset.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(thumb.state, JobState::Waiting);
        let meta = f
            .queue
            .status(JobLane::Metadata, &format!("metadata-{}", f.asset.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.state, JobState::Waiting);

        // The transcode job itself reads completed.
        let status = f
            .queue
            .status(JobLane::Transcode, &job_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.state, JobState::Completed);
    }

    #[tokio::test]
    async fn enqueue_dedupes_while_job_is_live() {
        let f = fixture().await;
        enqueue(&f).await;
        enqueue(&f).await;

        assert!(f.worker.process_next(JobLane::Transcode, 0.01).await.unwrap());
        // Second lease attempt finds nothing: only one job existed.
        assert!(!f.worker.process_next(JobLane::Transcode, 0.01).await.unwrap());
        assert_eq!(f.engine.transcodes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejects_non_video_uploads() {
        let f = fixture().await;
        let mut bogus = f.asset.clone();
        bogus.id = Uuid::new_v4();
        bogus.mime_type = "application/pdf".into();
        f.repo.create(&bogus).await.unwrap();

        let err = f
            .worker
            .enqueue_transcode(
                bogus.id,
                bogus.chapter_id,
                bogus.course_id,
                bogus.storage_key.clone(),
                Uuid::new_v4(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidUpload(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn three_failures_leave_video_failed_with_last_error() {
        let f = fixture().await;
        f.engine.fail_transcodes.store(true, Ordering::SeqCst);
        enqueue(&f).await;
        let job_id = format!("video-{}", f.asset.id);

        for attempt in 1..=3u32 {
            assert!(f.worker.process_next(JobLane::Transcode, 0.01).await.unwrap());
            let asset = f.repo.get(&f.asset.id).await.unwrap().unwrap();
            assert_eq!(asset.status, ProcessingStatus::Failed);
            assert!(asset.error.as_deref().unwrap().contains("x264 exploded"));
            if attempt < 3 {
                // Job sits in backoff until the delay elapses.
                let status = f.queue.status(JobLane::Transcode, &job_id).await.unwrap().unwrap();
                assert_eq!(status.state, JobState::Delayed);
                tokio::time::advance(std::time::Duration::from_secs(5)).await;
            }
        }

        let status = f.queue.status(JobLane::Transcode, &job_id).await.unwrap().unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.attempts, 3);
        assert!(status.failure.as_deref().unwrap().contains("x264 exploded"));
        assert_eq!(f.engine.transcodes.load(Ordering::SeqCst), 3);

        // No follow-on jobs for a failed transcode.
        let thumb = f
            .queue
            .status(JobLane::Thumbnail, &format!("thumbnail-{}", f.asset.id))
            .await
            .unwrap();
        assert!(thumb.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_transient_failure_recovers() {
        let f = fixture().await;
        f.engine.fail_transcodes.store(true, Ordering::SeqCst);
        enqueue(&f).await;

        assert!(f.worker.process_next(JobLane::Transcode, 0.01).await.unwrap());
        assert_eq!(
            f.repo.get(&f.asset.id).await.unwrap().unwrap().status,
            ProcessingStatus::Failed
        );

        // The next attempt succeeds and the status recovers.
        f.engine.fail_transcodes.store(false, Ordering::SeqCst);
        tokio::time::advance(std::time::Duration::from_secs(3)).await;
        assert!(f.worker.process_next(JobLane::Transcode, 0.01).await.unwrap());
        let asset = f.repo.get(&f.asset.id).await.unwrap().unwrap();
        assert_eq!(asset.status, ProcessingStatus::Completed);
        assert!(asset.error.is_none());
    }

    #[tokio::test]
    async fn thumbnail_retry_does_not_duplicate_rows() {
        let f = fixture().await;
        enqueue(&f).await;
        assert!(f.worker.process_next(JobLane::Transcode, 0.01).await.unwrap());

        assert!(f.worker.process_next(JobLane::Thumbnail, 0.01).await.unwrap());
        assert_eq!(f.repo.thumbnails(&f.asset.id).await.unwrap().len(), 6);

        // A re-run of the same job id replaces rather than appends.
        let follow = VideoJob {
            video_id: f.asset.id,
            chapter_id: f.asset.chapter_id,
            course_id: f.asset.course_id,
            source_key: f.asset.storage_key.clone(),
            requested_by: Uuid::new_v4(),
        };
        f.queue
            .enqueue(JobLane::Thumbnail, follow, EnqueueOptions::default())
            .await
            .unwrap();
        assert!(f.worker.process_next(JobLane::Thumbnail, 0.01).await.unwrap());
        let thumbs = f.repo.thumbnails(&f.asset.id).await.unwrap();
        assert_eq!(thumbs.len(), 6);
        assert_eq!(thumbs[5].time_offset_secs, 50);
    }

    #[tokio::test]
    async fn metadata_job_fills_probe_fields() {
        let f = fixture().await;
        enqueue(&f).await;
        assert!(f.worker.process_next(JobLane::Transcode, 0.01).await.unwrap());
        assert!(f.worker.process_next(JobLane::Metadata, 0.01).await.unwrap());

        let asset = f.repo.get(&f.asset.id).await.unwrap().unwrap();
        let metadata = asset.metadata.unwrap();
        assert_eq!(metadata.width, 1280);
        assert_eq!(metadata.height, 720);
        assert_eq!(metadata.duration_secs, 60.0);
        assert_eq!(metadata.codec, "h264");
    }

    #[tokio::test]
    async fn metadata_failure_leaves_video_completed() {
        let f = fixture().await;
        enqueue(&f).await;
        assert!(f.worker.process_next(JobLane::Transcode, 0.01).await.unwrap());

        f.engine.fail_probe.store(true, Ordering::SeqCst);
        assert!(f.worker.process_next(JobLane::Metadata, 0.01).await.unwrap());

        let asset = f.repo.get(&f.asset.id).await.unwrap().unwrap();
        assert_eq!(asset.status, ProcessingStatus::Completed);
        assert!(asset.error.is_none());

        let status = f
            .queue
            .status(JobLane::Metadata, &format!("metadata-{}", f.asset.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.state, JobState::Delayed);
    }

    #[tokio::test]
    async fn progress_is_reported_monotonically() {
        let f = fixture().await;
        enqueue(&f).await;
        assert!(f.worker.process_next(JobLane::Transcode, 0.01).await.unwrap());
        // Final state wins: completion pins progress at 100.
        let asset = f.repo.get(&f.asset.id).await.unwrap().unwrap();
        assert_eq!(asset.progress, 100);
    }
}
