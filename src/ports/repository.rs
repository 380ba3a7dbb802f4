use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::quality::Quality;
use crate::domain::token::AccessToken;
use crate::domain::video::{EncryptionKey, Thumbnail, VideoAsset, VideoMetadata};
use crate::error::RepoError;

/// Persistence for video assets and their thumbnails. The worker is the
/// only writer while a video is processing.
#[async_trait]
pub trait VideoRepository: Send + Sync {
    async fn create(&self, asset: &VideoAsset) -> Result<(), RepoError>;

    async fn get(&self, video_id: &Uuid) -> Result<Option<VideoAsset>, RepoError>;

    /// PROCESSING, progress 0, error cleared.
    async fn mark_processing(&self, video_id: &Uuid) -> Result<(), RepoError>;

    async fn set_progress(&self, video_id: &Uuid, progress: u8) -> Result<(), RepoError>;

    /// COMPLETED with the produced playlist URLs, progress 100.
    async fn mark_completed(
        &self,
        video_id: &Uuid,
        master_url: &str,
        rendition_urls: &BTreeMap<Quality, String>,
        at: DateTime<Utc>,
    ) -> Result<(), RepoError>;

    /// FAILED with the captured error message.
    async fn mark_failed(&self, video_id: &Uuid, error: &str) -> Result<(), RepoError>;

    async fn set_encryption_key(
        &self,
        video_id: &Uuid,
        key: &EncryptionKey,
        rotation_at: DateTime<Utc>,
    ) -> Result<(), RepoError>;

    async fn update_metadata(
        &self,
        video_id: &Uuid,
        metadata: &VideoMetadata,
    ) -> Result<(), RepoError>;

    /// Replace the full thumbnail set for a video. Replacement keeps a
    /// retried thumbnail job from duplicating rows.
    async fn put_thumbnails(
        &self,
        video_id: &Uuid,
        thumbnails: &[Thumbnail],
    ) -> Result<(), RepoError>;

    async fn thumbnails(&self, video_id: &Uuid) -> Result<Vec<Thumbnail>, RepoError>;

    /// Remove the asset row and its thumbnails.
    async fn delete(&self, video_id: &Uuid) -> Result<(), RepoError>;
}

/// Persistence for issued playback tokens, indexed by video and user for
/// revocation fan-out.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn insert(&self, token: &AccessToken) -> Result<(), RepoError>;

    async fn find(&self, token_id: &str) -> Result<Option<AccessToken>, RepoError>;

    /// Bump `access_count` and stamp `last_accessed_at`.
    async fn record_access(&self, token_id: &str, at: DateTime<Utc>) -> Result<(), RepoError>;

    /// Returns `false` when no such token exists.
    async fn revoke(&self, token_id: &str) -> Result<bool, RepoError>;

    async fn revoke_all_for_video(&self, video_id: &Uuid) -> Result<u64, RepoError>;

    async fn revoke_all_for_user(&self, user_id: &Uuid) -> Result<u64, RepoError>;

    /// Delete rows past their expiry. Hygiene only: expired rows already
    /// fail validation.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, RepoError>;

    /// Cascade for video deletion.
    async fn delete_all_for_video(&self, video_id: &Uuid) -> Result<u64, RepoError>;
}
