//! swapstore - versioned binary artifact registry with hot-swap reload
//!
//! Manages long-lived in-process binary artifacts (trained models and
//! similar blobs) that are persisted under a canonical naming/versioning
//! convention, discovered later by logical name and version constraint,
//! and hot-swapped into a running process without downtime when a newer
//! compatible artifact appears.
//!
//! # Core pieces
//!
//! - [`storage`]: one addressing scheme over local directories and remote
//!   object-store prefixes, with scoped read/write handles that guarantee
//!   scratch-file cleanup.
//! - [`naming`]: the `{timestamp}_{name}_v{semver}` filename codec and the
//!   version-constraint resolution algorithm.
//! - [`registry`]: the process-wide table of registered logical names,
//!   enforcing composite-key uniqueness.
//! - [`artifact`]: the managed lifecycle object owning the concurrent
//!   reload state machine - at most one refresh in flight, atomic swap,
//!   promote-on-access guard.
//! - [`signed`]: a class-free save/load path for opaque payloads behind an
//!   HMAC-signed envelope.
//!
//! # Example
//!
//! ```no_run
//! use serde::{Deserialize, Serialize};
//! use swapstore::{
//!     ArtifactPayload, ArtifactRegistry, ManagedArtifact, ScopedRead, ScopedWrite, Storage,
//!     StorageLocation,
//! };
//! use tokio::io::{AsyncReadExt, AsyncWriteExt};
//!
//! #[derive(Serialize, Deserialize)]
//! struct PriceModel {
//!     weights: Vec<f64>,
//! }
//!
//! #[async_trait::async_trait]
//! impl ArtifactPayload for PriceModel {
//!     async fn save_hook(&self, out: &mut ScopedWrite) -> std::io::Result<()> {
//!         let bytes = serde_json::to_vec(self)?;
//!         out.file().write_all(&bytes).await
//!     }
//!
//!     async fn load_hook(input: &mut ScopedRead) -> std::io::Result<Self> {
//!         let mut buf = Vec::new();
//!         input.file().read_to_end(&mut buf).await?;
//!         Ok(serde_json::from_slice(&buf)?)
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ArtifactRegistry::new();
//! let registration = registry.register("pricer", "1.0.0", Some(">=1.0.0, <2.0.0"))?;
//!
//! let storage = Storage::local();
//! let location = StorageLocation::parse("/var/lib/models")?;
//!
//! let model = ManagedArtifact::new(registration.clone(), PriceModel { weights: vec![] });
//! model.save(&storage, Some(&location)).await?;
//!
//! let live = ManagedArtifact::<PriceModel>::load(
//!     registration, &storage, Some(&location), None, None,
//! ).await?;
//! live.schedule_reload(&storage, Some(&location), None, std::time::Duration::from_secs(120))?;
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod naming;
pub mod registry;
pub mod signed;
pub mod storage;

pub use artifact::{ArtifactError, ArtifactPayload, ManagedArtifact};
pub use naming::{NameError, ResolveError, VersionedName, ARTIFACT_EXT};
pub use registry::{ArtifactRegistry, Registration, RegistryError};
pub use signed::{
    load_object, load_with_codec, save_object, save_with_codec, ObjectCodec, SignedStoreError,
    DEFAULT_SECRET,
};
pub use storage::{
    default_location, MemoryObjectStore, ObjectStore, ScopedRead, ScopedWrite, Storage,
    StorageError, StorageLocation, ROOT_ENV_VAR,
};
