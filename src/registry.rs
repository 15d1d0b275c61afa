//! Process-wide table of registered artifact types.
//!
//! The registry is the single piece of global mutable state in the system:
//! one composite key (`{logicalName}_v{version}`) per registered type, with
//! uniqueness enforced across everything currently registered. It is an
//! explicit object embedders construct and share, not a hidden singleton.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use semver::{Version, VersionReq};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registered name must be alphanumeric, got: {0}")]
    InvalidName(String),

    #[error("Invalid semantic version string: {0}")]
    InvalidVersion(String),

    #[error("Invalid version constraint: {0}")]
    InvalidConstraint(String),

    #[error("Already a registered artifact named {0}")]
    Duplicate(String),
}

/// A registered logical-name + version combination.
///
/// Handed out by [`ArtifactRegistry::register`] and required to construct a
/// managed artifact, so an unregistered artifact is unrepresentable.
#[derive(Debug, Clone)]
pub struct Registration {
    logical_name: String,
    version: Version,
    constraint: Option<VersionReq>,
}

impl Registration {
    pub fn logical_name(&self) -> &str {
        &self.logical_name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Version range acceptable when loading, if one was declared.
    pub fn constraint(&self) -> Option<&VersionReq> {
        self.constraint.as_ref()
    }

    /// Globally unique key for this registration.
    pub fn composite_key(&self) -> String {
        format!("{}_v{}", self.logical_name, self.version)
    }
}

/// Table of registered artifact types, safe for concurrent registration.
#[derive(Default)]
pub struct ArtifactRegistry {
    entries: DashMap<String, Registration>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `logical_name` at `version`, with an optional load
    /// constraint. Fails permanently on a duplicate composite key until the
    /// table is explicitly cleared.
    pub fn register(
        &self,
        logical_name: &str,
        version: &str,
        constraint: Option<&str>,
    ) -> Result<Registration, RegistryError> {
        if logical_name.is_empty() || !logical_name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(RegistryError::InvalidName(logical_name.to_string()));
        }
        let version = Version::parse(version)
            .map_err(|_| RegistryError::InvalidVersion(version.to_string()))?;
        let constraint = constraint
            .map(|raw| {
                VersionReq::parse(raw).map_err(|_| RegistryError::InvalidConstraint(raw.to_string()))
            })
            .transpose()?;

        let registration = Registration {
            logical_name: logical_name.to_string(),
            version,
            constraint,
        };
        let key = registration.composite_key();
        match self.entries.entry(key.clone()) {
            Entry::Occupied(_) => Err(RegistryError::Duplicate(key)),
            Entry::Vacant(slot) => {
                tracing::debug!(%key, "registered artifact type");
                slot.insert(registration.clone());
                Ok(registration)
            }
        }
    }

    /// Unregister everything. Destructive; intended for test isolation.
    pub fn clear(&self) {
        tracing::warn!(
            count = self.entries.len(),
            "removing all registered artifact types, proceed with caution"
        );
        self.entries.clear();
    }

    /// Sorted composite keys of everything currently registered.
    pub fn registered(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn contains(&self, composite_key: &str) -> bool {
        self.entries.contains_key(composite_key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
