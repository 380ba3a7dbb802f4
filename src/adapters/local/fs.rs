//! Filesystem-backed object store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::ports::storage::ObjectStorePort;

/// Stores objects as files under a root directory, keys as relative paths.
#[derive(Clone)]
pub struct FsStore {
    root: PathBuf,
    public_base: String,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into(),
        }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ObjectStorePort for FsStore {
    async fn download(&self, key: &str, local_path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(self.object_path(key), local_path).await?;
        Ok(())
    }

    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        _content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        let dest = self.object_path(key);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local_path, dest).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.object_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    let key = rel.to_string_lossy().replace('\\', "/");
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn presign(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        // No signer locally; mimic the URL shape.
        Ok(format!(
            "{}/{}?expires={}",
            self.public_base.trim_end_matches('/'),
            key,
            ttl.as_secs()
        ))
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base.trim_end_matches('/'), key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrips_objects_and_lists_by_prefix() {
        let root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let store = FsStore::new(root.path(), "https://cdn.test");

        let src = scratch.path().join("a.txt");
        tokio::fs::write(&src, b"hello").await.unwrap();
        store.upload(&src, "videos/a/a.txt", None).await.unwrap();
        store.upload(&src, "videos/b/b.txt", None).await.unwrap();

        let dest = scratch.path().join("back.txt");
        store.download("videos/a/a.txt", &dest).await.unwrap();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"hello");

        assert_eq!(store.list("videos/a").await.unwrap(), vec!["videos/a/a.txt"]);
        assert_eq!(store.list("").await.unwrap().len(), 2);

        store.delete("videos/a/a.txt").await.unwrap();
        assert!(store.list("videos/a").await.unwrap().is_empty());
        // Deleting a missing key is not an error.
        store.delete("videos/a/a.txt").await.unwrap();
    }

    #[tokio::test]
    async fn urls_are_deterministic() {
        let root = tempfile::tempdir().unwrap();
        let store = FsStore::new(root.path(), "https://cdn.test/");
        assert_eq!(store.public_url("a/b.m3u8"), "https://cdn.test/a/b.m3u8");
        let signed = store
            .presign("a/b.m3u8", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(signed, "https://cdn.test/a/b.m3u8?expires=60");
    }
}
