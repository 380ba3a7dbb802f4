use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageError;

/// Object store collaborator: content-addressed put/get/delete/list plus
/// URL generation.
#[async_trait]
pub trait ObjectStorePort: Send + Sync {
    /// Download an object to a local path.
    async fn download(&self, key: &str, local_path: &Path) -> Result<(), StorageError>;

    /// Upload a local file under the given key.
    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        content_type: Option<&str>,
    ) -> Result<(), StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// All keys under a prefix.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Time-limited signed GET URL.
    async fn presign(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;

    /// Deterministic public URL for a key.
    fn public_url(&self, key: &str) -> String;
}
