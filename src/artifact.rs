//! Managed artifact lifecycle: save, load, and zero-downtime hot-swap reload.
//!
//! A [`ManagedArtifact`] wraps a user payload behind a cheap cloneable
//! handle. Reloads run as background tasks; the freshly loaded replacement
//! is swapped into the live handle either when the reload itself completes
//! or when the next payload-facing call observes a finished pending load.
//! Callers never block on a refresh, and never see completed-but-unswapped
//! state once they touch the artifact again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::{RwLock, RwLockReadGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::naming::{ResolveError, VersionedName};
use crate::registry::Registration;
use crate::storage::{
    default_location, ScopedRead, ScopedWrite, Storage, StorageError, StorageLocation,
};

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("Resolved content hash {0} was explicitly skipped")]
    SkipRequested(String),

    #[error("Found already-running scheduled reload job")]
    JobAlreadyRunning,

    #[error("No scheduled reload job to cancel")]
    NoScheduledJob,

    #[error("Reload interval must be non-zero")]
    InvalidInterval,

    #[error("Payload hook failed: {0}")]
    Hook(#[source] std::io::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Serialization capability a payload type brings to its managed wrapper.
///
/// Hooks receive scoped handles so the same implementation works against
/// local directories and remote object stores. The load hook returning
/// `Self` is what makes a wrong-typed load unrepresentable.
#[async_trait]
pub trait ArtifactPayload: Sized + Send + Sync + 'static {
    async fn save_hook(&self, out: &mut ScopedWrite) -> std::io::Result<()>;

    async fn load_hook(input: &mut ScopedRead) -> std::io::Result<Self>;
}

/// The swappable portion of an artifact: the payload plus the content hash
/// of the file it was loaded from. Scheduler identity lives outside, so a
/// swap never touches it.
struct ArtifactState<P> {
    payload: P,
    current_hash: Option<String>,
}

type PendingLoad<P> = JoinHandle<Result<ArtifactState<P>, ArtifactError>>;

struct ScheduledJob {
    token: CancellationToken,
    task: JoinHandle<()>,
}

struct ArtifactCell<P> {
    registration: Registration,
    state: RwLock<ArtifactState<P>>,
    pending: Mutex<Option<PendingLoad<P>>>,
    reload_in_flight: AtomicBool,
    job: Mutex<Option<ScheduledJob>>,
}

impl<P> Drop for ArtifactCell<P> {
    fn drop(&mut self) {
        if let Some(job) = self.job.get_mut().take() {
            job.token.cancel();
            job.task.abort();
        }
        // Best effort: an in-flight load may already be past its last await.
        if let Some(pending) = self.pending.get_mut().take() {
            pending.abort();
        }
    }
}

/// Handle to a live, hot-swappable artifact.
///
/// Clones share state: after a reload promotes a newer version, every
/// holder of the handle observes the new payload.
pub struct ManagedArtifact<P> {
    cell: Arc<ArtifactCell<P>>,
}

impl<P> Clone for ManagedArtifact<P> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<P> std::fmt::Debug for ManagedArtifact<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedArtifact")
            .field("registration", &self.cell.registration)
            .finish_non_exhaustive()
    }
}

impl<P: ArtifactPayload> ManagedArtifact<P> {
    /// Wrap `payload` under `registration`. Nothing has been loaded yet, so
    /// the content hash starts unset.
    pub fn new(registration: Registration, payload: P) -> Self {
        Self::from_state(
            registration,
            ArtifactState {
                payload,
                current_hash: None,
            },
        )
    }

    fn from_state(registration: Registration, state: ArtifactState<P>) -> Self {
        Self {
            cell: Arc::new(ArtifactCell {
                registration,
                state: RwLock::new(state),
                pending: Mutex::new(None),
                reload_in_flight: AtomicBool::new(false),
                job: Mutex::new(None),
            }),
        }
    }

    pub fn registration(&self) -> &Registration {
        &self.cell.registration
    }

    /// Serialize the payload to a freshly timestamped versioned name under
    /// `location` (default location when `None`). Returns the address
    /// written.
    pub async fn save(
        &self,
        storage: &Storage,
        location: Option<&StorageLocation>,
    ) -> Result<String, ArtifactError> {
        let location = location.cloned().unwrap_or_else(default_location);
        let name = VersionedName::stamped_now(
            self.cell.registration.logical_name(),
            self.cell.registration.version(),
        )
        .encode();
        storage.ensure_exists(&location).await?;
        let mut out = storage.scoped_write(&location, &name).await?;
        {
            let state = self.cell.state.read().await;
            state
                .payload
                .save_hook(&mut out)
                .await
                .map_err(ArtifactError::Hook)?;
        }
        out.commit().await?;
        let address = location.stitch(&name);
        tracing::debug!(%address, "artifact saved");
        Ok(address)
    }

    /// Resolve and load the best stored candidate for `registration`.
    ///
    /// `specifier` narrows candidate filenames by timestamp substring.
    /// `skip_hash` short-circuits with [`ArtifactError::SkipRequested`]
    /// when resolution lands on content that is already held.
    pub async fn load(
        registration: Registration,
        storage: &Storage,
        location: Option<&StorageLocation>,
        specifier: Option<&str>,
        skip_hash: Option<&str>,
    ) -> Result<Self, ArtifactError> {
        let location = location.cloned().unwrap_or_else(default_location);
        let state = load_state::<P>(&registration, storage, &location, specifier, skip_hash).await?;
        Ok(Self::from_state(registration, state))
    }

    /// Refresh from storage in the background and promote the result.
    ///
    /// Best effort by design: when resolution finds nothing new to promote
    /// (no candidates, or nothing satisfying the constraint), the refresh
    /// is logged and skipped rather than surfaced, unlike [`load`] which
    /// fails hard. A reload requested while another is still in flight
    /// coalesces into that one instead of starting a second load.
    ///
    /// [`load`]: Self::load
    pub async fn reload(
        &self,
        storage: &Storage,
        location: Option<&StorageLocation>,
        specifier: Option<&str>,
    ) {
        let location = location.cloned().unwrap_or_else(default_location);
        self.reload_at(storage, &location, specifier).await;
    }

    async fn reload_at(
        &self,
        storage: &Storage,
        location: &StorageLocation,
        specifier: Option<&str>,
    ) {
        if self
            .cell
            .reload_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("reload already in flight, coalescing");
            return;
        }
        tracing::debug!("initializing background reload");
        let registration = self.cell.registration.clone();
        let storage = storage.clone();
        let location = location.clone();
        let specifier = specifier.map(str::to_owned);
        let handle = tokio::spawn(async move {
            load_state::<P>(&registration, &storage, &location, specifier.as_deref(), None).await
        });
        *self.cell.pending.lock() = Some(handle);
        self.promote_pending().await;
    }

    /// Register a recurring background reload at `interval`. At most one
    /// job may be active per artifact; cancel the current one first to
    /// change the cadence.
    pub fn schedule_reload(
        &self,
        storage: &Storage,
        location: Option<&StorageLocation>,
        specifier: Option<&str>,
        interval: Duration,
    ) -> Result<(), ArtifactError> {
        if interval.is_zero() {
            return Err(ArtifactError::InvalidInterval);
        }
        let mut job = self.cell.job.lock();
        if job.is_some() {
            return Err(ArtifactError::JobAlreadyRunning);
        }

        let token = CancellationToken::new();
        let weak = Arc::downgrade(&self.cell);
        let storage = storage.clone();
        let location = location.cloned().unwrap_or_else(default_location);
        let specifier = specifier.map(str::to_owned);
        let child = token.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; consume it so polls start
            // one interval after scheduling.
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    () = child.cancelled() => {
                        tracing::debug!("scheduled reload cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(cell) = weak.upgrade() else { break };
                        let artifact = ManagedArtifact { cell };
                        artifact.reload_at(&storage, &location, specifier.as_deref()).await;
                    }
                }
            }
        });
        *job = Some(ScheduledJob { token, task });
        tracing::debug!(?interval, "scheduled recurring reload");
        Ok(())
    }

    /// Stop the recurring reload. Only future recurrences are stopped; a
    /// load already in flight completes and is promoted normally.
    pub fn cancel_scheduled_reload(&self) -> Result<(), ArtifactError> {
        match self.cell.job.lock().take() {
            Some(job) => {
                job.token.cancel();
                Ok(())
            }
            None => Err(ArtifactError::NoScheduledJob),
        }
    }

    /// Read access to the payload, promoting a finished pending reload
    /// first.
    pub async fn read(&self) -> RwLockReadGuard<'_, P> {
        self.promote_if_ready().await;
        let state = self.cell.state.read().await;
        RwLockReadGuard::map(state, |s| &s.payload)
    }

    /// Run `f` against the payload, promoting a finished pending reload
    /// first.
    pub async fn with_payload<R>(&self, f: impl FnOnce(&P) -> R) -> R {
        let payload = self.read().await;
        f(&payload)
    }

    /// Content hash of the most recently loaded file, if anything has been
    /// loaded. Promotes a finished pending reload first.
    pub async fn current_hash(&self) -> Option<String> {
        self.promote_if_ready().await;
        self.cell.state.read().await.current_hash.clone()
    }

    /// Whether a background reload is currently in flight.
    pub fn reload_in_flight(&self) -> bool {
        self.cell.reload_in_flight.load(Ordering::SeqCst)
    }

    /// Whether a recurring reload job is active.
    pub fn has_scheduled_reload(&self) -> bool {
        self.cell.job.lock().is_some()
    }

    /// Swap in a pending replacement if its load has finished.
    async fn promote_if_ready(&self) {
        let handle = {
            let mut pending = self.cell.pending.lock();
            match pending.as_ref() {
                Some(h) if h.is_finished() => pending.take(),
                _ => None,
            }
        };
        if let Some(handle) = handle {
            self.finish(handle).await;
        }
    }

    /// Await the pending load, whatever state it is in, and apply it.
    async fn promote_pending(&self) {
        let handle = self.cell.pending.lock().take();
        if let Some(handle) = handle {
            self.finish(handle).await;
        }
    }

    async fn finish(&self, handle: PendingLoad<P>) {
        match handle.await {
            Ok(Ok(fresh)) => self.install(fresh).await,
            Ok(Err(ArtifactError::Resolve(err))) => {
                tracing::debug!(%err, "reload skipped, nothing new to promote");
            }
            Ok(Err(ArtifactError::SkipRequested(hash))) => {
                tracing::debug!(%hash, "reload skipped, content already current");
            }
            Ok(Err(err)) => tracing::warn!(%err, "background reload failed"),
            Err(err) => tracing::warn!(%err, "background reload task did not complete"),
        }
        self.cell.reload_in_flight.store(false, Ordering::SeqCst);
    }

    /// The swap step: replace payload and hash in one write-lock section.
    /// Matching hashes mean the replacement is identical content, so the
    /// live state is left untouched.
    async fn install(&self, fresh: ArtifactState<P>) {
        let mut state = self.cell.state.write().await;
        if fresh.current_hash == state.current_hash {
            tracing::debug!(hash = ?state.current_hash, "found matching content hash, skipping swap");
            return;
        }
        tracing::debug!(
            current = ?state.current_hash,
            new = ?fresh.current_hash,
            "promoting freshly loaded artifact state"
        );
        *state = fresh;
    }
}

/// Resolve the best stored candidate and run the payload load hook on it.
async fn load_state<P: ArtifactPayload>(
    registration: &Registration,
    storage: &Storage,
    location: &StorageLocation,
    specifier: Option<&str>,
    skip_hash: Option<&str>,
) -> Result<ArtifactState<P>, ArtifactError> {
    let pattern = VersionedName::search_pattern(registration.logical_name(), specifier);
    tracing::debug!(%location, %pattern, "searching for matching artifact files");
    let listed = storage.list_matching(location, &pattern).await?;

    let mut candidates = Vec::with_capacity(listed.len());
    for name in &listed {
        match VersionedName::decode(name) {
            Ok(decoded) if decoded.logical_name == registration.logical_name() => {
                candidates.push(decoded)
            }
            Ok(_) => {}
            Err(err) => tracing::debug!(%name, %err, "skipping undecodable listing entry"),
        }
    }

    let chosen = VersionedName::resolve(&candidates, registration.constraint())?;
    let filename = chosen.encode();
    let hash = file_stem_hash(&filename);
    if skip_hash == Some(hash.as_str()) {
        return Err(ArtifactError::SkipRequested(hash));
    }

    tracing::debug!(address = %location.stitch(&filename), "retrieving artifact");
    let mut input = storage.scoped_read(location, &filename).await?;
    let payload = P::load_hook(&mut input)
        .await
        .map_err(ArtifactError::Hook)?;
    Ok(ArtifactState {
        payload,
        current_hash: Some(hash),
    })
}

/// Hex SHA-256 of a filename without its extension, used to detect whether
/// a resolved file is the one already loaded.
fn file_stem_hash(filename: &str) -> String {
    let stem = match filename.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => filename,
    };
    hex::encode(Sha256::digest(stem.as_bytes()))
}
