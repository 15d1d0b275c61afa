//! Integration tests for the signed lite path - versioning scheme, secret
//! enforcement, and codec dispatch.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use swapstore::{
    load_object, load_with_codec, save_object, save_with_codec, MemoryObjectStore, ObjectCodec,
    SignedStoreError, Storage, StorageError, StorageLocation,
};
use tempfile::TempDir;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Classifier {
    classes: Vec<String>,
    threshold: f64,
}

fn classifier(threshold: f64) -> Classifier {
    Classifier {
        classes: vec!["spam".to_string(), "ham".to_string()],
        threshold,
    }
}

fn setup() -> (Storage, TempDir, StorageLocation) {
    let dir = TempDir::new().unwrap();
    let location = StorageLocation::from(dir.path());
    (Storage::local(), dir, location)
}

#[tokio::test]
async fn test_unversioned_round_trip_without_secret() {
    let (storage, _dir, location) = setup();
    let original = classifier(0.5);

    save_object(&original, "clf", &storage, &location, false, None)
        .await
        .unwrap();
    let loaded: Classifier = load_object("clf", &storage, &location, false, None)
        .await
        .unwrap();

    assert_eq!(loaded, original);
}

#[tokio::test]
async fn test_unversioned_save_never_overwrites() {
    let (storage, _dir, location) = setup();

    save_object(&classifier(0.5), "clf", &storage, &location, false, None)
        .await
        .unwrap();
    for _ in 0..3 {
        let err = save_object(&classifier(0.9), "clf", &storage, &location, false, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SignedStoreError::Storage(StorageError::AlreadyExists(_))
        ));
    }

    // The original is untouched.
    let loaded: Classifier = load_object("clf", &storage, &location, false, None)
        .await
        .unwrap();
    assert_eq!(loaded.threshold, 0.5);
}

#[tokio::test]
async fn test_versioned_saves_assign_increasing_suffixes() {
    let (storage, _dir, location) = setup();

    for (index, threshold) in [0.1, 0.2, 0.3].iter().enumerate() {
        let address = save_object(
            &classifier(*threshold),
            "clf",
            &storage,
            &location,
            true,
            None,
        )
        .await
        .unwrap();
        assert!(
            address.ends_with(&format!("clf-v{}", index + 1)),
            "unexpected address {}",
            address
        );
    }

    // Versioned load resolves the highest suffix.
    let loaded: Classifier = load_object("clf", &storage, &location, true, None)
        .await
        .unwrap();
    assert_eq!(loaded.threshold, 0.3);
}

#[tokio::test]
async fn test_secret_mismatch_is_unauthorized_not_a_decode_error() {
    let (storage, _dir, location) = setup();

    save_object(&classifier(0.5), "clf", &storage, &location, false, Some("A"))
        .await
        .unwrap();
    let err = load_object::<Classifier>("clf", &storage, &location, false, Some("B"))
        .await
        .unwrap_err();

    assert!(matches!(err, SignedStoreError::Unauthorized));
}

#[tokio::test]
async fn test_default_secret_round_trips_when_none_supplied() {
    let (storage, _dir, location) = setup();

    save_object(&classifier(0.5), "clf", &storage, &location, false, None)
        .await
        .unwrap();
    // Loading with no secret after saving with none always succeeds.
    let loaded: Classifier = load_object("clf", &storage, &location, false, None)
        .await
        .unwrap();
    assert_eq!(loaded.threshold, 0.5);
}

#[tokio::test]
async fn test_missing_name_is_no_match_never_unauthorized() {
    let (storage, _dir, location) = setup();

    for versioned in [false, true] {
        let err = load_object::<Classifier>("ghost", &storage, &location, versioned, Some("A"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, SignedStoreError::NoMatch { .. }),
            "expected NoMatch, got {:?}",
            err
        );
    }
}

#[tokio::test]
async fn test_invalid_name_is_rejected() {
    let (storage, _dir, location) = setup();

    let err = save_object(&classifier(0.5), "bad name", &storage, &location, false, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SignedStoreError::InvalidName(_)));

    let err = load_object::<Classifier>("bad/name", &storage, &location, false, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SignedStoreError::InvalidName(_)));
}

struct CsvMatrix {
    rows: Vec<Vec<f64>>,
}

impl ObjectCodec for CsvMatrix {
    const TYPE_TAG: &'static str = "csvmatrix";

    fn encode(&self) -> Result<Vec<u8>, SignedStoreError> {
        let text = self
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(f64::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(text.into_bytes())
    }

    fn decode(raw: &[u8]) -> Result<Self, SignedStoreError> {
        let text =
            String::from_utf8(raw.to_vec()).map_err(|err| SignedStoreError::Codec(err.to_string()))?;
        let rows = text
            .lines()
            .map(|line| {
                line.split(',')
                    .map(|cell| {
                        cell.parse::<f64>()
                            .map_err(|err| SignedStoreError::Codec(err.to_string()))
                    })
                    .collect()
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { rows })
    }
}

#[tokio::test]
async fn test_custom_codec_round_trip() {
    let (storage, _dir, location) = setup();
    let matrix = CsvMatrix {
        rows: vec![vec![1.0, 2.0], vec![3.0, 4.0]],
    };

    save_with_codec(&matrix, "embedding", &storage, &location, false, Some("key"))
        .await
        .unwrap();
    let loaded: CsvMatrix = load_with_codec("embedding", &storage, &location, false, Some("key"))
        .await
        .unwrap();

    assert_eq!(loaded.rows, matrix.rows);
}

#[tokio::test]
async fn test_codec_tag_mismatch_is_a_contract_violation() {
    let (storage, _dir, location) = setup();
    let matrix = CsvMatrix {
        rows: vec![vec![1.0]],
    };

    save_with_codec(&matrix, "embedding", &storage, &location, false, None)
        .await
        .unwrap();
    let err = load_object::<Classifier>("embedding", &storage, &location, false, None)
        .await
        .unwrap_err();

    assert!(matches!(err, SignedStoreError::TypeTagMismatch { .. }));
}

#[tokio::test]
async fn test_round_trip_against_remote_object_store() {
    let store = Arc::new(MemoryObjectStore::new());
    let storage = Storage::with_remote(store);
    let location = StorageLocation::parse("s3://models/lite").unwrap();
    let original = classifier(0.5);

    save_object(&original, "clf", &storage, &location, true, Some("key"))
        .await
        .unwrap();
    let loaded: Classifier = load_object("clf", &storage, &location, true, Some("key"))
        .await
        .unwrap();

    assert_eq!(loaded, original);
}
