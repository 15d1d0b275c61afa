//! Storage location addressing for local directories and remote object prefixes.
//!
//! A location string is either a plain filesystem path or a
//! `scheme://bucket/key-prefix` address. All higher layers accept both
//! transparently and never branch on the scheme themselves.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::StorageError;

/// Environment variable holding the default artifact root.
pub const ROOT_ENV_VAR: &str = "SWAPSTORE_ROOT";

/// A place artifacts can be written to and listed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    /// A directory on a reachable filesystem.
    Local(PathBuf),
    /// A bucket and key prefix on a remote object store.
    Remote {
        scheme: String,
        bucket: String,
        prefix: String,
    },
}

impl StorageLocation {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        StorageLocation::Local(path.into())
    }

    pub fn remote(scheme: &str, bucket: &str, prefix: &str) -> Self {
        StorageLocation::Remote {
            scheme: scheme.to_string(),
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    /// Parse a location string. Anything containing `://` is remote.
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        match raw.split_once("://") {
            None => Ok(StorageLocation::Local(PathBuf::from(raw))),
            Some((scheme, rest)) => {
                let (bucket, prefix) = match rest.split_once('/') {
                    Some((bucket, prefix)) => (bucket, prefix.trim_matches('/')),
                    None => (rest, ""),
                };
                if scheme.is_empty() || bucket.is_empty() {
                    return Err(StorageError::InvalidLocation(raw.to_string()));
                }
                Ok(StorageLocation::Remote {
                    scheme: scheme.to_string(),
                    bucket: bucket.to_string(),
                    prefix: prefix.to_string(),
                })
            }
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, StorageLocation::Remote { .. })
    }

    /// Full address of an object named `name` under this location.
    ///
    /// Separators are normalized so concatenation never produces double
    /// slashes regardless of how the prefix was written.
    pub fn stitch(&self, name: &str) -> String {
        match self {
            StorageLocation::Local(dir) => dir.join(name).display().to_string(),
            StorageLocation::Remote { .. } => {
                format!("{}/{}", self, name.trim_start_matches('/'))
            }
        }
    }

    /// Object key for `name` under a remote location's prefix.
    pub(crate) fn key_for(&self, name: &str) -> String {
        match self {
            StorageLocation::Local(dir) => dir.join(name).display().to_string(),
            StorageLocation::Remote { prefix, .. } => {
                let name = name.trim_start_matches('/');
                if prefix.is_empty() {
                    name.to_string()
                } else {
                    format!("{}/{}", prefix, name)
                }
            }
        }
    }

}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageLocation::Local(dir) => write!(f, "{}", dir.display()),
            StorageLocation::Remote {
                scheme,
                bucket,
                prefix,
            } => {
                if prefix.is_empty() {
                    write!(f, "{}://{}", scheme, bucket)
                } else {
                    write!(f, "{}://{}/{}", scheme, bucket, prefix)
                }
            }
        }
    }
}

impl FromStr for StorageLocation {
    type Err = StorageError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        StorageLocation::parse(raw)
    }
}

impl From<&Path> for StorageLocation {
    fn from(path: &Path) -> Self {
        StorageLocation::Local(path.to_path_buf())
    }
}

impl From<PathBuf> for StorageLocation {
    fn from(path: PathBuf) -> Self {
        StorageLocation::Local(path)
    }
}

/// Default location when the caller passes none: `SWAPSTORE_ROOT` if set,
/// else the current working directory.
pub fn default_location() -> StorageLocation {
    if let Ok(root) = std::env::var(ROOT_ENV_VAR) {
        match StorageLocation::parse(&root) {
            Ok(location) => return location,
            Err(err) => {
                tracing::warn!(%root, %err, "ignoring malformed {}", ROOT_ENV_VAR);
            }
        }
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    tracing::warn!(
        "falling back to {}, as no directory specified in {}",
        cwd.display(),
        ROOT_ENV_VAR
    );
    StorageLocation::Local(cwd)
}
