//! Remote object store abstraction.
//!
//! The concrete cloud client lives outside this crate; embedders hand a
//! boxed [`ObjectStore`] to [`Storage`](super::Storage). The in-memory
//! implementation below backs tests and in-process use.

use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;

use super::StorageError;

/// Minimal client surface the storage layer needs from an object store.
///
/// Implementations signal failures through [`StorageError::Transport`];
/// this crate propagates them unmodified and never retries.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError>;

    /// Create a bucket. Creation races are tolerated by the caller: a
    /// second creator losing the race is treated as success as long as the
    /// bucket exists afterwards.
    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError>;

    /// All keys under `prefix`, in no particular order.
    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError>;

    async fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<(), StorageError>;

    async fn upload(&self, src: &Path, bucket: &str, key: &str) -> Result<(), StorageError>;
}

/// In-process object store keyed by bucket name.
#[derive(Default)]
pub struct MemoryObjectStore {
    buckets: DashMap<String, DashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw object bytes, mainly for test assertions.
    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.buckets
            .get(bucket)
            .and_then(|objects| objects.get(key).map(|entry| entry.value().clone()))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError> {
        Ok(self.buckets.contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        self.buckets.entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let objects = self
            .buckets
            .get(bucket)
            .ok_or_else(|| StorageError::Transport(format!("no such bucket: {}", bucket)))?;
        Ok(objects
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| key.starts_with(prefix))
            .collect())
    }

    async fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<(), StorageError> {
        let data = self.get(bucket, key).ok_or_else(|| {
            StorageError::Transport(format!("no such object: {}/{}", bucket, key))
        })?;
        tokio::fs::write(dest, data).await?;
        Ok(())
    }

    async fn upload(&self, src: &Path, bucket: &str, key: &str) -> Result<(), StorageError> {
        let data = tokio::fs::read(src).await?;
        let objects = self
            .buckets
            .entry(bucket.to_string())
            .or_default();
        objects.insert(key.to_string(), data);
        Ok(())
    }
}
