//! Lightweight signed save/load for opaque payloads.
//!
//! The lite path handles payloads that need no class-based lifecycle:
//! serialize, wrap in an envelope carrying a type tag, sign the envelope
//! with HMAC-SHA256 under a caller secret, and write it through the same
//! storage layer the managed path uses. Verification must pass before the
//! type tag is trusted, and a bad signature is always distinguishable from
//! an absent object.
//!
//! Without a caller-supplied secret, envelopes are signed with a well-known
//! default key. That guards against accidental misuse, not adversaries; it
//! is explicitly not a security boundary until a real secret is supplied.

use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::storage::{Storage, StorageError, StorageLocation};

/// Signing key used when the caller supplies no secret.
pub const DEFAULT_SECRET: &str = "swapstore";

/// Type tag for payloads serialized with the generic serde codec.
const GENERIC_TAG: &str = "generic";

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug)]
pub enum SignedStoreError {
    #[error("Name must be alphanumeric, got: {0}")]
    InvalidName(String),

    #[error("No matching object named {name} at {location}")]
    NoMatch { name: String, location: String },

    #[error("Mismatched secret - deserialization not authorized")]
    Unauthorized,

    #[error("Envelope type tag mismatch: expected {expected}, found {found}")]
    TypeTagMismatch { expected: String, found: String },

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Payload codec failed: {0}")]
    Codec(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Custom serialization strategy for the lite path, selected on load by the
/// envelope's type tag.
pub trait ObjectCodec: Sized {
    /// Tag recorded in the envelope; must be stable across versions of the
    /// implementing type.
    const TYPE_TAG: &'static str;

    fn encode(&self) -> Result<Vec<u8>, SignedStoreError>;

    fn decode(raw: &[u8]) -> Result<Self, SignedStoreError>;
}

/// On-disk form: the signature covers the type tag and the raw payload
/// bytes, so neither can be altered independently.
#[derive(Serialize, Deserialize)]
struct Envelope {
    class: String,
    data: String,
    signature: String,
}

/// Save a serializable payload under `name`, tagged with the generic codec.
///
/// Versioned saves auto-assign the next integer suffix (`{name}-v{N}`) by
/// counting existing matches; concurrent writers can race to the same
/// suffix, a known limitation of count-based assignment. Unversioned saves
/// fail with an already-exists error if `name` is present.
pub async fn save_object<T: Serialize>(
    payload: &T,
    name: &str,
    storage: &Storage,
    location: &StorageLocation,
    versioned: bool,
    secret: Option<&str>,
) -> Result<String, SignedStoreError> {
    let raw = serde_json::to_vec(payload).map_err(|err| SignedStoreError::Codec(err.to_string()))?;
    write_envelope(raw, GENERIC_TAG, name, storage, location, versioned, secret).await
}

/// Load a payload saved by [`save_object`].
pub async fn load_object<T: DeserializeOwned>(
    name: &str,
    storage: &Storage,
    location: &StorageLocation,
    versioned: bool,
    secret: Option<&str>,
) -> Result<T, SignedStoreError> {
    let raw = read_envelope(name, storage, location, versioned, secret, GENERIC_TAG).await?;
    serde_json::from_slice(&raw).map_err(|err| SignedStoreError::Codec(err.to_string()))
}

/// Save a payload through its [`ObjectCodec`] implementation.
pub async fn save_with_codec<T: ObjectCodec>(
    payload: &T,
    name: &str,
    storage: &Storage,
    location: &StorageLocation,
    versioned: bool,
    secret: Option<&str>,
) -> Result<String, SignedStoreError> {
    let raw = payload.encode()?;
    write_envelope(raw, T::TYPE_TAG, name, storage, location, versioned, secret).await
}

/// Load a payload saved by [`save_with_codec`]. Fails with a type-tag
/// mismatch if the envelope was written by a different codec.
pub async fn load_with_codec<T: ObjectCodec>(
    name: &str,
    storage: &Storage,
    location: &StorageLocation,
    versioned: bool,
    secret: Option<&str>,
) -> Result<T, SignedStoreError> {
    let raw = read_envelope(name, storage, location, versioned, secret, T::TYPE_TAG).await?;
    T::decode(&raw)
}

fn validate_name(name: &str) -> Result<(), SignedStoreError> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(SignedStoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

async fn write_envelope(
    raw: Vec<u8>,
    class: &str,
    name: &str,
    storage: &Storage,
    location: &StorageLocation,
    versioned: bool,
    secret: Option<&str>,
) -> Result<String, SignedStoreError> {
    validate_name(name)?;
    storage.ensure_exists(location).await?;

    let filename = if versioned {
        let matches = storage
            .list_matching(location, &format!("{}-*", name))
            .await?;
        let version = matches.len() + 1;
        tracing::debug!(%name, version, "assigning object version");
        format!("{}-v{}", name, version)
    } else {
        if storage.exists(location, name).await? {
            return Err(StorageError::AlreadyExists(location.stitch(name)).into());
        }
        name.to_string()
    };

    let envelope = seal(&raw, class, secret)?;
    let bytes =
        serde_json::to_vec(&envelope).map_err(|err| SignedStoreError::Codec(err.to_string()))?;

    let mut out = storage.scoped_write(location, &filename).await?;
    out.file()
        .write_all(&bytes)
        .await
        .map_err(StorageError::Io)?;
    out.commit().await?;

    let address = location.stitch(&filename);
    tracing::debug!(%address, "signed object saved");
    Ok(address)
}

async fn read_envelope(
    name: &str,
    storage: &Storage,
    location: &StorageLocation,
    versioned: bool,
    secret: Option<&str>,
    expected_tag: &str,
) -> Result<Vec<u8>, SignedStoreError> {
    validate_name(name)?;

    let filename = if versioned {
        let matches = storage
            .list_matching(location, &format!("{}-*", name))
            .await?;
        highest_suffix(name, &matches).ok_or_else(|| SignedStoreError::NoMatch {
            name: name.to_string(),
            location: location.to_string(),
        })?
    } else {
        if !storage.exists(location, name).await? {
            return Err(SignedStoreError::NoMatch {
                name: name.to_string(),
                location: location.to_string(),
            });
        }
        name.to_string()
    };

    tracing::debug!(address = %location.stitch(&filename), "loading signed object");
    let mut input = storage.scoped_read(location, &filename).await?;
    let mut bytes = Vec::new();
    input
        .file()
        .read_to_end(&mut bytes)
        .await
        .map_err(StorageError::Io)?;

    let envelope: Envelope = serde_json::from_slice(&bytes)
        .map_err(|err| SignedStoreError::MalformedEnvelope(err.to_string()))?;
    open(envelope, secret, expected_tag)
}

/// Highest `{name}-v{N}` among `matches`, compared numerically.
fn highest_suffix(name: &str, matches: &[String]) -> Option<String> {
    let tag = format!("{}-v", name);
    matches
        .iter()
        .filter_map(|candidate| {
            candidate
                .strip_prefix(&tag)
                .and_then(|suffix| suffix.parse::<u64>().ok())
        })
        .max()
        .map(|version| format!("{}-v{}", name, version))
}

fn signer(secret: Option<&str>) -> Result<HmacSha256, SignedStoreError> {
    let key = secret.unwrap_or(DEFAULT_SECRET);
    HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|_| SignedStoreError::Codec("invalid signing key".to_string()))
}

fn seal(raw: &[u8], class: &str, secret: Option<&str>) -> Result<Envelope, SignedStoreError> {
    let mut mac = signer(secret)?;
    mac.update(class.as_bytes());
    mac.update(&[0]);
    mac.update(raw);
    Ok(Envelope {
        class: class.to_string(),
        data: hex::encode(raw),
        signature: hex::encode(mac.finalize().into_bytes()),
    })
}

/// Verify then unwrap. The tag is only compared after the signature has
/// been checked, so an attacker cannot steer codec dispatch.
fn open(
    envelope: Envelope,
    secret: Option<&str>,
    expected_tag: &str,
) -> Result<Vec<u8>, SignedStoreError> {
    let raw = hex::decode(&envelope.data)
        .map_err(|err| SignedStoreError::MalformedEnvelope(err.to_string()))?;
    let signature = hex::decode(&envelope.signature)
        .map_err(|err| SignedStoreError::MalformedEnvelope(err.to_string()))?;

    let mut mac = signer(secret)?;
    mac.update(envelope.class.as_bytes());
    mac.update(&[0]);
    mac.update(&raw);
    mac.verify_slice(&signature)
        .map_err(|_| SignedStoreError::Unauthorized)?;

    if envelope.class != expected_tag {
        return Err(SignedStoreError::TypeTagMismatch {
            expected: expected_tag.to_string(),
            found: envelope.class,
        });
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_round_trips() {
        let envelope = seal(b"payload", GENERIC_TAG, Some("s3cret")).unwrap();
        let raw = open(envelope, Some("s3cret"), GENERIC_TAG).unwrap();
        assert_eq!(raw, b"payload");
    }

    #[test]
    fn open_with_wrong_secret_is_unauthorized() {
        let envelope = seal(b"payload", GENERIC_TAG, Some("alpha")).unwrap();
        assert!(matches!(
            open(envelope, Some("beta"), GENERIC_TAG),
            Err(SignedStoreError::Unauthorized)
        ));
    }

    #[test]
    fn tampered_tag_fails_verification_not_dispatch() {
        let mut envelope = seal(b"payload", GENERIC_TAG, None).unwrap();
        envelope.class = "attacker".to_string();
        assert!(matches!(
            open(envelope, None, "attacker"),
            Err(SignedStoreError::Unauthorized)
        ));
    }

    #[test]
    fn highest_suffix_is_numeric_not_lexicographic() {
        let matches: Vec<String> = (1..=12).map(|v| format!("clf-v{}", v)).collect();
        assert_eq!(highest_suffix("clf", &matches), Some("clf-v12".to_string()));
        assert_eq!(highest_suffix("clf", &[]), None);
    }
}
