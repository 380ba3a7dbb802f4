//! Video assets and their processing lifecycle.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::quality::Quality;

/// Processing lifecycle of an uploaded video.
///
/// Transitions run PENDING -> PROCESSING -> {COMPLETED | FAILED}. A retried
/// job flips FAILED back to PROCESSING; COMPLETED is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// AES-128 key material for HLS segment encryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionKey {
    pub key_hex: String,
    pub iv_hex: String,
}

impl EncryptionKey {
    /// Generate a fresh 16-byte key and IV.
    pub fn generate() -> Self {
        let mut key = [0u8; 16];
        let mut iv = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut key);
        rand::thread_rng().fill_bytes(&mut iv);
        Self {
            key_hex: hex::encode(key),
            iv_hex: hex::encode(iv),
        }
    }

    pub fn key_bytes(&self) -> Result<Vec<u8>, hex::FromHexError> {
        hex::decode(&self.key_hex)
    }
}

/// Technical metadata extracted by the metadata job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub codec: String,
    pub frame_rate: f64,
    pub bitrate_bps: Option<u64>,
}

/// One row per uploaded video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoAsset {
    pub id: Uuid,
    pub chapter_id: Uuid,
    pub course_id: Uuid,
    pub original_filename: String,
    pub size_bytes: u64,
    pub mime_type: String,
    /// Key of the raw upload in the object store. Exactly one asset owns a
    /// given key at a time.
    pub storage_key: String,
    pub status: ProcessingStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub hls_master_url: Option<String>,
    pub rendition_urls: BTreeMap<Quality, String>,
    pub metadata: Option<VideoMetadata>,
    pub encryption: Option<EncryptionKey>,
    pub key_rotation_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl VideoAsset {
    /// A freshly uploaded, not-yet-processed video.
    pub fn new(
        id: Uuid,
        chapter_id: Uuid,
        course_id: Uuid,
        original_filename: impl Into<String>,
        size_bytes: u64,
        mime_type: impl Into<String>,
        storage_key: impl Into<String>,
    ) -> Self {
        Self {
            id,
            chapter_id,
            course_id,
            original_filename: original_filename.into(),
            size_bytes,
            mime_type: mime_type.into(),
            storage_key: storage_key.into(),
            status: ProcessingStatus::Pending,
            progress: 0,
            error: None,
            hls_master_url: None,
            rendition_urls: BTreeMap::new(),
            metadata: None,
            encryption: None,
            key_rotation_at: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Thumbnail owned by a video. Immutable once written; destroyed with its
/// video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub video_id: Uuid,
    pub storage_key: String,
    pub url: String,
    /// Seconds from the start of the video.
    pub time_offset_secs: u32,
    pub width: u32,
    pub height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_material_is_16_bytes() {
        let key = EncryptionKey::generate();
        assert_eq!(key.key_hex.len(), 32);
        assert_eq!(key.iv_hex.len(), 32);
        assert_eq!(key.key_bytes().unwrap().len(), 16);
    }

    #[test]
    fn generated_keys_differ() {
        assert_ne!(EncryptionKey::generate(), EncryptionKey::generate());
    }

    #[test]
    fn new_asset_starts_pending() {
        let asset = VideoAsset::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "lecture.mp4",
            1024,
            "video/mp4",
            "courses/a/chapters/b/videos/1_lecture.mp4",
        );
        assert_eq!(asset.status, ProcessingStatus::Pending);
        assert_eq!(asset.progress, 0);
        assert!(asset.hls_master_url.is_none());
        assert!(asset.encryption.is_none());
    }

    #[test]
    fn asset_roundtrips_through_json() {
        let mut asset = VideoAsset::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "lecture.mp4",
            1024,
            "video/mp4",
            "key",
        );
        asset
            .rendition_urls
            .insert(Quality::Q720, "https://cdn/720p/playlist.m3u8".into());
        let json = serde_json::to_string(&asset).unwrap();
        assert!(json.contains("\"720p\""));
        let back: VideoAsset = serde_json::from_str(&json).unwrap();
        assert_eq!(back.rendition_urls, asset.rendition_urls);
        assert_eq!(back.status, ProcessingStatus::Pending);
    }
}
