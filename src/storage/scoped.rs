//! Scoped read/write handles over local and remote targets.
//!
//! Local targets hand out file handles at the final path. Remote targets
//! materialize through a private scratch file: downloads happen before the
//! first read, uploads happen on [`ScopedWrite::commit`]. The scratch file
//! is removed on every exit path, including when the body fails before
//! commit, via the [`tempfile::TempPath`] guard.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use super::object_store::ObjectStore;
use super::StorageError;

/// Where a committed write ends up.
enum ScopedTarget {
    Local,
    Remote {
        store: Arc<dyn ObjectStore>,
        bucket: String,
        key: String,
    },
}

fn scratch_file() -> Result<(TempPath, PathBuf), StorageError> {
    let temp = tempfile::Builder::new()
        .prefix("swapstore-")
        .suffix(".scratch")
        .tempfile()?
        .into_temp_path();
    let path = temp.to_path_buf();
    Ok((temp, path))
}

/// Write handle for a single named object.
///
/// The payload hook writes through [`file`](Self::file) (or externally to
/// [`path`](Self::path)); nothing reaches a remote target until
/// [`commit`](Self::commit) succeeds.
pub struct ScopedWrite {
    file: File,
    path: PathBuf,
    target: ScopedTarget,
    scratch: Option<TempPath>,
}

impl ScopedWrite {
    pub(super) async fn local(path: PathBuf) -> Result<Self, StorageError> {
        let file = File::create(&path).await?;
        Ok(Self {
            file,
            path,
            target: ScopedTarget::Local,
            scratch: None,
        })
    }

    pub(super) async fn remote(
        store: Arc<dyn ObjectStore>,
        bucket: String,
        key: String,
    ) -> Result<Self, StorageError> {
        let (scratch, path) = scratch_file()?;
        let file = File::create(&path).await?;
        Ok(Self {
            file,
            path,
            target: ScopedTarget::Remote { store, bucket, key },
            scratch: Some(scratch),
        })
    }

    /// Local path being written. For remote targets this is the scratch
    /// file, useful for serializers that only write through paths.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&mut self) -> &mut File {
        &mut self.file
    }

    /// Flush the handle, upload to the remote key if applicable, and
    /// release the scratch file.
    pub async fn commit(self) -> Result<(), StorageError> {
        let ScopedWrite {
            mut file,
            path,
            target,
            scratch,
        } = self;
        file.flush().await?;
        drop(file);
        if let ScopedTarget::Remote { store, bucket, key } = &target {
            tracing::debug!(%bucket, %key, "uploading scratch file to remote key");
            store.upload(&path, bucket, key).await?;
        }
        if let Some(scratch) = scratch {
            scratch.close()?;
        }
        Ok(())
    }
}

/// Read handle for a single named object.
///
/// Remote objects are downloaded to a scratch file before the handle is
/// returned; the scratch file is removed when the handle drops.
#[derive(Debug)]
pub struct ScopedRead {
    file: File,
    path: PathBuf,
    _scratch: Option<TempPath>,
}

impl ScopedRead {
    pub(super) async fn local(path: PathBuf) -> Result<Self, StorageError> {
        let file = File::open(&path).await?;
        Ok(Self {
            file,
            path,
            _scratch: None,
        })
    }

    pub(super) async fn remote(
        store: Arc<dyn ObjectStore>,
        bucket: &str,
        key: &str,
    ) -> Result<Self, StorageError> {
        let (scratch, path) = scratch_file()?;
        tracing::debug!(%bucket, %key, "downloading remote key to scratch file");
        store.download(bucket, key, &path).await?;
        let file = File::open(&path).await?;
        Ok(Self {
            file,
            path,
            _scratch: Some(scratch),
        })
    }

    /// Local path of the materialized object.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&mut self) -> &mut File {
        &mut self.file
    }
}
