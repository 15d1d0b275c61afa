//! Storage layer: one addressing scheme over local directories and remote
//! object prefixes.
//!
//! Every operation goes through [`Storage`], which binds an optional remote
//! client so that listing, existence checks, and scoped I/O behave the same
//! at every call site regardless of where a location points.

mod location;
mod object_store;
mod scoped;

pub use location::{default_location, StorageLocation, ROOT_ENV_VAR};
pub use object_store::{MemoryObjectStore, ObjectStore};
pub use scoped::{ScopedRead, ScopedWrite};

use std::io::ErrorKind;
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid storage location: {0}")]
    InvalidLocation(String),

    #[error("Invalid listing pattern: {0}")]
    InvalidPattern(String),

    #[error("No remote object store client configured for {0}")]
    NoRemoteClient(String),

    #[error("Target already exists: {0}")]
    AlreadyExists(String),

    #[error("Remote transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle to the storage layer. Cheap to clone; all clones share the same
/// remote client, if any.
#[derive(Clone, Default)]
pub struct Storage {
    remote: Option<Arc<dyn ObjectStore>>,
}

impl Storage {
    /// Storage restricted to local locations.
    pub fn local() -> Self {
        Self { remote: None }
    }

    /// Storage that can also resolve remote locations through `store`.
    pub fn with_remote(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            remote: Some(store),
        }
    }

    fn remote_client(&self, location: &StorageLocation) -> Result<Arc<dyn ObjectStore>, StorageError> {
        self.remote
            .clone()
            .ok_or_else(|| StorageError::NoRemoteClient(location.to_string()))
    }

    /// Names under `location` matching the glob `pattern`, sorted descending
    /// lexicographically so encoded timestamps read most-recent-first.
    ///
    /// A missing local directory lists as empty rather than erroring, so
    /// "nothing there yet" stays a resolution outcome, not a transport one.
    pub async fn list_matching(
        &self,
        location: &StorageLocation,
        pattern: &str,
    ) -> Result<Vec<String>, StorageError> {
        let matcher = glob_regex(pattern)?;
        let mut names = match location {
            StorageLocation::Local(dir) => {
                tracing::debug!(dir = %dir.display(), %pattern, "searching on filesystem");
                let mut entries = match tokio::fs::read_dir(dir).await {
                    Ok(entries) => entries,
                    Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
                    Err(err) => return Err(err.into()),
                };
                let mut names = Vec::new();
                while let Some(entry) = entries.next_entry().await? {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if matcher.is_match(&name) {
                        names.push(name);
                    }
                }
                names
            }
            StorageLocation::Remote { bucket, prefix, .. } => {
                tracing::debug!(%bucket, %prefix, %pattern, "searching remote prefix");
                let store = self.remote_client(location)?;
                store
                    .list_keys(bucket, prefix)
                    .await?
                    .into_iter()
                    .map(|key| match key.rsplit_once('/') {
                        Some((_, name)) => name.to_string(),
                        None => key.clone(),
                    })
                    .filter(|name| matcher.is_match(name))
                    .collect()
            }
        };
        names.sort_by(|a, b| b.cmp(a));
        Ok(names)
    }

    /// Idempotently create the location: recursive directory creation for
    /// local paths, bucket creation for remote ones. Creation races are
    /// tolerated; the loser proceeds once the target exists.
    pub async fn ensure_exists(&self, location: &StorageLocation) -> Result<(), StorageError> {
        match location {
            StorageLocation::Local(dir) => {
                tracing::debug!(dir = %dir.display(), "safely ensuring directory exists");
                tokio::fs::create_dir_all(dir).await?;
                Ok(())
            }
            StorageLocation::Remote { bucket, .. } => {
                let store = self.remote_client(location)?;
                if store.bucket_exists(bucket).await? {
                    return Ok(());
                }
                tracing::warn!(%bucket, "bucket does not exist, creating it");
                if let Err(err) = store.create_bucket(bucket).await {
                    if store.bucket_exists(bucket).await? {
                        tracing::debug!(%bucket, %err, "lost bucket creation race");
                        return Ok(());
                    }
                    return Err(err);
                }
                Ok(())
            }
        }
    }

    /// Whether an object named exactly `name` exists under `location`.
    pub async fn exists(
        &self,
        location: &StorageLocation,
        name: &str,
    ) -> Result<bool, StorageError> {
        match location {
            StorageLocation::Local(dir) => {
                match tokio::fs::metadata(dir.join(name)).await {
                    Ok(_) => Ok(true),
                    Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
                    Err(err) => Err(err.into()),
                }
            }
            StorageLocation::Remote { bucket, .. } => {
                let store = self.remote_client(location)?;
                let key = location.key_for(name);
                Ok(store.list_keys(bucket, &key).await?.contains(&key))
            }
        }
    }

    /// Open a scoped write handle for `name` under `location`.
    pub async fn scoped_write(
        &self,
        location: &StorageLocation,
        name: &str,
    ) -> Result<ScopedWrite, StorageError> {
        match location {
            StorageLocation::Local(dir) => ScopedWrite::local(dir.join(name)).await,
            StorageLocation::Remote { bucket, .. } => {
                let store = self.remote_client(location)?;
                ScopedWrite::remote(store, bucket.clone(), location.key_for(name)).await
            }
        }
    }

    /// Open a scoped read handle for `name` under `location`.
    pub async fn scoped_read(
        &self,
        location: &StorageLocation,
        name: &str,
    ) -> Result<ScopedRead, StorageError> {
        match location {
            StorageLocation::Local(dir) => ScopedRead::local(dir.join(name)).await,
            StorageLocation::Remote { bucket, .. } => {
                let store = self.remote_client(location)?;
                ScopedRead::remote(store, bucket, &location.key_for(name)).await
            }
        }
    }
}

/// Compile a glob (`*` and `?` wildcards) into an anchored regex.
fn glob_regex(pattern: &str) -> Result<Regex, StorageError> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|_| StorageError::InvalidPattern(pattern.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_like_a_shell() {
        let re = glob_regex("*_pricer_v*.bin").unwrap();
        assert!(re.is_match("20240101120000_pricer_v1.0.0.bin"));
        assert!(!re.is_match("20240101120000_ranker_v1.0.0.bin"));
        assert!(!re.is_match("20240101120000_pricer_v1.0.0.bin.bak"));
    }

    #[test]
    fn glob_escapes_regex_metacharacters() {
        let re = glob_regex("model-v1.?").unwrap();
        assert!(re.is_match("model-v1.2"));
        assert!(!re.is_match("model-v1x2"));
    }
}
