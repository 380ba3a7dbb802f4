//! Redis VideoRepository and TokenRepository implementations.
//!
//! Rows are stored as JSON documents; token rows carry per-video and
//! per-user index sets plus an expiry zset for the sweep.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::redis::AsyncCommands;
use uuid::Uuid;

use super::pool::RedisPool;
use super::{
    TOKEN_EXPIRY_INDEX, TOKEN_PREFIX, TOKEN_USER_INDEX_PREFIX, TOKEN_VIDEO_INDEX_PREFIX,
    VIDEO_PREFIX,
};
use crate::domain::quality::Quality;
use crate::domain::token::AccessToken;
use crate::domain::video::{
    EncryptionKey, ProcessingStatus, Thumbnail, VideoAsset, VideoMetadata,
};
use crate::error::RepoError;
use crate::ports::repository::{TokenRepository, VideoRepository};

fn video_key(video_id: &Uuid) -> String {
    format!("{VIDEO_PREFIX}{video_id}")
}

fn thumbnails_key(video_id: &Uuid) -> String {
    format!("{VIDEO_PREFIX}{video_id}:thumbnails")
}

fn token_key(token_id: &str) -> String {
    format!("{TOKEN_PREFIX}{token_id}")
}

fn token_video_index(video_id: &Uuid) -> String {
    format!("{TOKEN_VIDEO_INDEX_PREFIX}{video_id}")
}

fn token_user_index(user_id: &Uuid) -> String {
    format!("{TOKEN_USER_INDEX_PREFIX}{user_id}")
}

impl RedisPool {
    /// Read-modify-write on a video row.
    async fn update_asset(
        &self,
        video_id: &Uuid,
        mutate: impl FnOnce(&mut VideoAsset) + Send,
    ) -> Result<(), RepoError> {
        let mut conn = self.pool.get().await.map_err(RepoError::from)?;
        let key = video_key(video_id);
        let json: Option<String> = conn.get(&key).await.map_err(RepoError::from)?;
        let Some(json) = json else {
            return Err(RepoError::NotFound);
        };
        let mut asset: VideoAsset = serde_json::from_str(&json)?;
        mutate(&mut asset);
        conn.set::<_, _, ()>(&key, serde_json::to_string(&asset)?)
            .await
            .map_err(RepoError::from)?;
        Ok(())
    }

    async fn load_token(&self, token_id: &str) -> Result<Option<AccessToken>, RepoError> {
        let mut conn = self.pool.get().await.map_err(RepoError::from)?;
        let json: Option<String> = conn
            .get(token_key(token_id))
            .await
            .map_err(RepoError::from)?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn store_token(&self, token: &AccessToken) -> Result<(), RepoError> {
        let mut conn = self.pool.get().await.map_err(RepoError::from)?;
        conn.set::<_, _, ()>(token_key(&token.token_id), serde_json::to_string(token)?)
            .await
            .map_err(RepoError::from)?;
        Ok(())
    }

    /// Remove a token row together with its index entries.
    async fn purge_token(&self, token: &AccessToken) -> Result<(), RepoError> {
        let mut conn = self.pool.get().await.map_err(RepoError::from)?;
        conn.del::<_, ()>(token_key(&token.token_id))
            .await
            .map_err(RepoError::from)?;
        conn.srem::<_, _, ()>(token_video_index(&token.video_id), &token.token_id)
            .await
            .map_err(RepoError::from)?;
        conn.srem::<_, _, ()>(token_user_index(&token.user_id), &token.token_id)
            .await
            .map_err(RepoError::from)?;
        conn.zrem::<_, _, ()>(TOKEN_EXPIRY_INDEX, &token.token_id)
            .await
            .map_err(RepoError::from)?;
        Ok(())
    }

    async fn revoke_ids(&self, token_ids: Vec<String>) -> Result<u64, RepoError> {
        let mut count = 0;
        for token_id in token_ids {
            if let Some(mut token) = self.load_token(&token_id).await? {
                if !token.is_revoked {
                    token.is_revoked = true;
                    self.store_token(&token).await?;
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl VideoRepository for RedisPool {
    async fn create(&self, asset: &VideoAsset) -> Result<(), RepoError> {
        let mut conn = self.pool.get().await.map_err(RepoError::from)?;
        conn.set::<_, _, ()>(video_key(&asset.id), serde_json::to_string(asset)?)
            .await
            .map_err(RepoError::from)?;
        Ok(())
    }

    async fn get(&self, video_id: &Uuid) -> Result<Option<VideoAsset>, RepoError> {
        let mut conn = self.pool.get().await.map_err(RepoError::from)?;
        let json: Option<String> = conn
            .get(video_key(video_id))
            .await
            .map_err(RepoError::from)?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn mark_processing(&self, video_id: &Uuid) -> Result<(), RepoError> {
        self.update_asset(video_id, |asset| {
            asset.status = ProcessingStatus::Processing;
            asset.progress = 0;
            asset.error = None;
        })
        .await
    }

    async fn set_progress(&self, video_id: &Uuid, progress: u8) -> Result<(), RepoError> {
        self.update_asset(video_id, |asset| asset.progress = progress.min(100))
            .await
    }

    async fn mark_completed(
        &self,
        video_id: &Uuid,
        master_url: &str,
        rendition_urls: &BTreeMap<Quality, String>,
        at: DateTime<Utc>,
    ) -> Result<(), RepoError> {
        let master_url = master_url.to_string();
        let rendition_urls = rendition_urls.clone();
        self.update_asset(video_id, move |asset| {
            asset.status = ProcessingStatus::Completed;
            asset.progress = 100;
            asset.error = None;
            asset.hls_master_url = Some(master_url);
            asset.rendition_urls = rendition_urls;
            asset.completed_at = Some(at);
        })
        .await
    }

    async fn mark_failed(&self, video_id: &Uuid, error: &str) -> Result<(), RepoError> {
        let error = error.to_string();
        self.update_asset(video_id, move |asset| {
            asset.status = ProcessingStatus::Failed;
            asset.error = Some(error);
        })
        .await
    }

    async fn set_encryption_key(
        &self,
        video_id: &Uuid,
        key: &EncryptionKey,
        rotation_at: DateTime<Utc>,
    ) -> Result<(), RepoError> {
        let key = key.clone();
        self.update_asset(video_id, move |asset| {
            asset.encryption = Some(key);
            asset.key_rotation_at = Some(rotation_at);
        })
        .await
    }

    async fn update_metadata(
        &self,
        video_id: &Uuid,
        metadata: &VideoMetadata,
    ) -> Result<(), RepoError> {
        let metadata = metadata.clone();
        self.update_asset(video_id, move |asset| asset.metadata = Some(metadata))
            .await
    }

    async fn put_thumbnails(
        &self,
        video_id: &Uuid,
        thumbnails: &[Thumbnail],
    ) -> Result<(), RepoError> {
        let mut conn = self.pool.get().await.map_err(RepoError::from)?;
        conn.set::<_, _, ()>(thumbnails_key(video_id), serde_json::to_string(thumbnails)?)
            .await
            .map_err(RepoError::from)?;
        Ok(())
    }

    async fn thumbnails(&self, video_id: &Uuid) -> Result<Vec<Thumbnail>, RepoError> {
        let mut conn = self.pool.get().await.map_err(RepoError::from)?;
        let json: Option<String> = conn
            .get(thumbnails_key(video_id))
            .await
            .map_err(RepoError::from)?;
        match json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    async fn delete(&self, video_id: &Uuid) -> Result<(), RepoError> {
        let mut conn = self.pool.get().await.map_err(RepoError::from)?;
        conn.del::<_, ()>(&[video_key(video_id), thumbnails_key(video_id)])
            .await
            .map_err(RepoError::from)?;
        Ok(())
    }
}

#[async_trait]
impl TokenRepository for RedisPool {
    async fn insert(&self, token: &AccessToken) -> Result<(), RepoError> {
        self.store_token(token).await?;
        let mut conn = self.pool.get().await.map_err(RepoError::from)?;
        conn.sadd::<_, _, ()>(token_video_index(&token.video_id), &token.token_id)
            .await
            .map_err(RepoError::from)?;
        conn.sadd::<_, _, ()>(token_user_index(&token.user_id), &token.token_id)
            .await
            .map_err(RepoError::from)?;
        conn.zadd::<_, _, _, ()>(
            TOKEN_EXPIRY_INDEX,
            &token.token_id,
            token.expires_at.timestamp(),
        )
        .await
        .map_err(RepoError::from)?;
        Ok(())
    }

    async fn find(&self, token_id: &str) -> Result<Option<AccessToken>, RepoError> {
        self.load_token(token_id).await
    }

    async fn record_access(&self, token_id: &str, at: DateTime<Utc>) -> Result<(), RepoError> {
        let mut token = self.load_token(token_id).await?.ok_or(RepoError::NotFound)?;
        token.access_count += 1;
        token.last_accessed_at = Some(at);
        self.store_token(&token).await
    }

    async fn revoke(&self, token_id: &str) -> Result<bool, RepoError> {
        match self.load_token(token_id).await? {
            Some(mut token) => {
                token.is_revoked = true;
                self.store_token(&token).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_all_for_video(&self, video_id: &Uuid) -> Result<u64, RepoError> {
        let mut conn = self.pool.get().await.map_err(RepoError::from)?;
        let ids: Vec<String> = conn
            .smembers(token_video_index(video_id))
            .await
            .map_err(RepoError::from)?;
        drop(conn);
        self.revoke_ids(ids).await
    }

    async fn revoke_all_for_user(&self, user_id: &Uuid) -> Result<u64, RepoError> {
        let mut conn = self.pool.get().await.map_err(RepoError::from)?;
        let ids: Vec<String> = conn
            .smembers(token_user_index(user_id))
            .await
            .map_err(RepoError::from)?;
        drop(conn);
        self.revoke_ids(ids).await
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, RepoError> {
        let mut conn = self.pool.get().await.map_err(RepoError::from)?;
        let expired: Vec<String> = conn
            .zrangebyscore(TOKEN_EXPIRY_INDEX, 0i64, now.timestamp())
            .await
            .map_err(RepoError::from)?;
        drop(conn);

        let mut count = 0;
        for token_id in expired {
            if let Some(token) = self.load_token(&token_id).await? {
                self.purge_token(&token).await?;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete_all_for_video(&self, video_id: &Uuid) -> Result<u64, RepoError> {
        let mut conn = self.pool.get().await.map_err(RepoError::from)?;
        let ids: Vec<String> = conn
            .smembers(token_video_index(video_id))
            .await
            .map_err(RepoError::from)?;
        drop(conn);

        let mut count = 0;
        for token_id in ids {
            if let Some(token) = self.load_token(&token_id).await? {
                self.purge_token(&token).await?;
                count += 1;
            }
        }
        Ok(count)
    }
}
