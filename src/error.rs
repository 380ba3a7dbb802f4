//! Error types shared across ports and services.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue backend error: {0}")]
    Backend(String),
    #[error("job serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("repository backend error: {0}")]
    Backend(String),
    #[error("record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("record not found")]
    NotFound,
}

/// Failures of the transcoding stage. All of them are fatal to the job:
/// a partial rendition ladder is never published.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("probe failed: {0}")]
    Probe(String),
    #[error("source has no video stream")]
    NoVideoStream,
    #[error("{stage} encode failed: {detail}")]
    Encoder { stage: &'static str, detail: String },
    #[error("encryption key material invalid: {0}")]
    BadKey(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Job-level failure. Anything here aborts the whole job so the queue's
/// retry policy applies.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("video {0} not found")]
    UnknownVideo(Uuid),
    #[error("invalid upload: {0}")]
    InvalidUpload(String),
}

/// Token issuance failures. Entitlement denial is a final verdict, not a
/// retryable condition.
#[derive(Debug, Error)]
pub enum IssueError {
    #[error("access denied: no entitlement for this course")]
    AccessDenied,
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("credential signing failed: {0}")]
    Signing(String),
}
