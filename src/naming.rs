//! Canonical artifact filename encoding and version resolution.
//!
//! Artifacts are stored as `{timestamp}_{logicalName}_v{semver}.bin` with a
//! fixed-width UTC timestamp, so a plain lexicographic sort on encoded names
//! orders them by recency. Resolution picks either the most recent candidate
//! or, under a version constraint, the highest satisfying version with
//! recency as the tiebreak.

use std::cmp::Ordering;
use std::fmt;

use chrono::Utc;
use semver::{Version, VersionReq};
use thiserror::Error;

/// Extension for class-based artifact files.
pub const ARTIFACT_EXT: &str = "bin";

/// Format of the fixed-width sortable timestamp (UTC, second precision).
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const TIMESTAMP_WIDTH: usize = 14;

#[derive(Error, Debug)]
pub enum NameError {
    #[error("Malformed artifact filename: {0}")]
    Malformed(String),

    #[error("Invalid semantic version in filename {name}: {version}")]
    InvalidVersion { name: String, version: String },
}

/// Resolution failures callers can distinguish from load failures: there was
/// nothing acceptable to load, not a broken transport or payload.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("No artifact candidates found")]
    NoCandidates,

    #[error("No candidate satisfies version constraint {constraint}")]
    NoVersionMatch { constraint: String },
}

/// Decoded form of a canonical artifact filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedName {
    pub timestamp: String,
    pub logical_name: String,
    pub version: Version,
}

impl VersionedName {
    /// A name for `logical_name` at `version`, stamped with the current UTC
    /// second.
    pub fn stamped_now(logical_name: &str, version: &Version) -> Self {
        Self {
            timestamp: Utc::now().format(TIMESTAMP_FORMAT).to_string(),
            logical_name: logical_name.to_string(),
            version: version.clone(),
        }
    }

    /// Encode to the canonical filename.
    pub fn encode(&self) -> String {
        format!(
            "{}_{}_v{}.{}",
            self.timestamp, self.logical_name, self.version, ARTIFACT_EXT
        )
    }

    /// Decode a filename produced by [`encode`](Self::encode). Fails unless
    /// the three-part `{timestamp}_{name}_v{version}` structure is present.
    pub fn decode(name: &str) -> Result<Self, NameError> {
        let stem = match name.rsplit_once('.') {
            Some((stem, _ext)) => stem,
            None => name,
        };
        let parts: Vec<&str> = stem.split('_').collect();
        let &[timestamp, logical_name, tagged_version] = parts.as_slice() else {
            return Err(NameError::Malformed(name.to_string()));
        };
        if timestamp.len() != TIMESTAMP_WIDTH || !timestamp.bytes().all(|b| b.is_ascii_digit()) {
            return Err(NameError::Malformed(name.to_string()));
        }
        let raw_version = tagged_version
            .strip_prefix('v')
            .ok_or_else(|| NameError::Malformed(name.to_string()))?;
        let version = Version::parse(raw_version).map_err(|_| NameError::InvalidVersion {
            name: name.to_string(),
            version: raw_version.to_string(),
        })?;
        Ok(Self {
            timestamp: timestamp.to_string(),
            logical_name: logical_name.to_string(),
            version,
        })
    }

    /// Glob used against storage listings to find candidates for
    /// `logical_name`, optionally narrowed by a timestamp `specifier`
    /// substring.
    pub fn search_pattern(logical_name: &str, specifier: Option<&str>) -> String {
        match specifier {
            None => format!("*_{}_v*.{}", logical_name, ARTIFACT_EXT),
            Some(specifier) => {
                format!("*{}*_{}_v*.{}", specifier, logical_name, ARTIFACT_EXT)
            }
        }
    }

    /// Pick the best candidate.
    ///
    /// Without a constraint, the most recent candidate wins. With one, the
    /// highest version satisfying it wins (constraint-selection, not
    /// recency-selection); multiple files at that exact version fall back to
    /// most-recent-by-timestamp. `candidates` must already be sorted
    /// most-recent-first, as produced by storage listing.
    pub fn resolve<'a>(
        candidates: &'a [VersionedName],
        constraint: Option<&VersionReq>,
    ) -> Result<&'a VersionedName, ResolveError> {
        let first = candidates.first().ok_or(ResolveError::NoCandidates)?;
        let req = match constraint {
            None => return Ok(first),
            Some(req) => req,
        };
        tracing::debug!(constraint = %req, "matching version requirements");
        let best = candidates
            .iter()
            .filter(|candidate| req.matches(&candidate.version))
            .map(|candidate| &candidate.version)
            .max()
            .ok_or_else(|| ResolveError::NoVersionMatch {
                constraint: req.to_string(),
            })?
            .clone();
        tracing::debug!(version = %best, "found version to aspire to");
        let mut at_best = candidates
            .iter()
            .filter(|candidate| candidate.version == best);
        let chosen = at_best.next().ok_or(ResolveError::NoCandidates)?;
        if at_best.next().is_some() {
            tracing::warn!(
                version = %best,
                "multiple files at best version, selecting most recent by timestamp"
            );
        }
        Ok(chosen)
    }
}

impl fmt::Display for VersionedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl Ord for VersionedName {
    /// Most-recent-first: a sorted sequence starts with the newest name.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| self.logical_name.cmp(&other.logical_name))
            .then_with(|| self.version.cmp(&other.version))
    }
}

impl PartialOrd for VersionedName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
