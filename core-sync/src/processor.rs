//! # Sync Processor
//!
//! Reconciles one file between its local copy and its remote.
//!
//! [`SyncProcessor`] is the contract callers use. [`BackendSyncProcessor`]
//! implements it once for every backend: a [`SyncBackend`] only supplies
//! timestamps and the raw upload/download operations, while the processor
//! owns the decision, the progress state machine and the per-file guard.
//!
//! ## Progress
//!
//! During `process()` a file moves `Idle → Syncing → {Uploading|Downloading}
//! → Idle`. Each transition is broadcast before the I/O it announces. The
//! final `Idle` is emitted by a drop guard, so it fires on every exit path.
//!
//! ## Concurrency
//!
//! At most one `process()` runs per uid. A second caller gets
//! [`SyncError::AlreadySyncing`] immediately instead of racing the first on
//! the same working copy.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use core_runtime::events::{EventBus, SyncProgressStatus};
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, SyncError};
use crate::model::{AuthorityKey, FileDescriptor};
use crate::progress::ProgressTracker;
use crate::status::{
    ConflictResolutionStrategy, SyncConflict, SyncResolution, SyncStatus, SyncStrategy,
};
use crate::strategy::SyncStrategyResolver;

/// Modification times of one file, epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncTimestamps {
    /// Local copy
    pub local: Option<i64>,
    /// Remote state the local copy was last synchronized with
    pub cached_remote: Option<i64>,
    /// Current remote state
    pub remote: Option<i64>,
}

impl SyncTimestamps {
    pub fn resolve(&self, strategy: SyncStrategy) -> SyncResolution {
        SyncStrategyResolver::resolve(self.local, self.cached_remote, self.remote, strategy)
    }
}

/// Reconciliation contract exposed to callers
#[async_trait]
pub trait SyncProcessor: Send + Sync {
    /// Backend instance this processor reconciles against
    fn authority(&self) -> AuthorityKey;

    /// Strategy that suits this backend best
    fn preferred_strategy(&self) -> SyncStrategy;

    /// Compute the current status of `uid`
    ///
    /// May perform network I/O. Failures are folded into
    /// `Error`, `AuthError` or `FileNotFound`.
    async fn sync_status_for_file(&self, uid: &str) -> SyncStatus;

    /// Last computed status, without I/O
    fn cached_sync_status(&self, uid: &str) -> Option<SyncStatus>;

    /// In-memory progress of `uid`
    fn sync_progress_for_file(&self, uid: &str) -> SyncProgressStatus;

    /// Both sides of a file whose status is `Conflict`
    ///
    /// # Errors
    ///
    /// [`SyncError::NoConflict`] when the file is not in conflict.
    async fn sync_conflict_for_file(&self, uid: &str) -> Result<SyncConflict>;

    /// Backend-opaque token for the state materialized locally
    async fn revision(&self, uid: &str) -> Result<Option<String>>;

    /// Reconcile `file`
    ///
    /// # Arguments
    ///
    /// * `strategy` - comparison rule; `LastModificationWins` when `None`
    /// * `resolution` - side to keep when the comparison reports divergent edits
    ///
    /// # Errors
    ///
    /// - [`SyncError::NeedsResolution`] on divergent edits without `resolution`
    /// - [`SyncError::AlreadySyncing`] when another call is reconciling `file`
    /// - any backend error, unchanged
    async fn process(
        &self,
        file: &FileDescriptor,
        strategy: Option<SyncStrategy>,
        resolution: Option<ConflictResolutionStrategy>,
    ) -> Result<FileDescriptor>;
}

/// Raw operations a storage backend provides to [`BackendSyncProcessor`]
#[async_trait]
pub trait SyncBackend: Send + Sync {
    async fn timestamps(&self, uid: &str) -> Result<SyncTimestamps>;

    /// Push the local copy of `file` to the remote
    async fn upload(&self, file: &FileDescriptor) -> Result<FileDescriptor>;

    /// Replace the local copy of `file` with the remote one
    async fn download(&self, file: &FileDescriptor) -> Result<FileDescriptor>;

    /// Settle divergent edits by making the local copy the remote state
    ///
    /// Must not depend on local history the remote never saw.
    async fn resolve_with_local(&self, file: &FileDescriptor) -> Result<FileDescriptor> {
        self.upload(file).await
    }

    /// Settle divergent edits by taking the remote state as is
    async fn resolve_with_remote(&self, file: &FileDescriptor) -> Result<FileDescriptor> {
        self.download(file).await
    }

    async fn conflict(&self, uid: &str) -> Result<SyncConflict>;

    async fn revision(&self, uid: &str) -> Result<Option<String>>;

    fn preferred_strategy(&self) -> SyncStrategy;
}

/// [`SyncProcessor`] driving any [`SyncBackend`]
pub struct BackendSyncProcessor<B> {
    authority: AuthorityKey,
    backend: B,
    progress: ProgressTracker,
    statuses: Mutex<HashMap<String, SyncStatus>>,
    active: Mutex<HashSet<String>>,
}

impl<B: SyncBackend> BackendSyncProcessor<B> {
    pub fn new(authority: AuthorityKey, backend: B, event_bus: EventBus) -> Self {
        Self {
            progress: ProgressTracker::new(authority.to_string(), event_bus),
            authority,
            backend,
            statuses: Mutex::new(HashMap::new()),
            active: Mutex::new(HashSet::new()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn cache_status(&self, uid: &str, status: SyncStatus) {
        lock(&self.statuses).insert(uid.to_string(), status);
    }

    /// Claim `uid` for one reconciliation
    fn begin(&self, uid: &str) -> Result<ProcessGuard<'_>> {
        if !lock(&self.active).insert(uid.to_string()) {
            return Err(SyncError::AlreadySyncing {
                uid: uid.to_string(),
            });
        }
        Ok(ProcessGuard {
            uid: uid.to_string(),
            active: &self.active,
            progress: &self.progress,
        })
    }

    async fn reconcile(
        &self,
        file: &FileDescriptor,
        strategy: Option<SyncStrategy>,
        resolution: Option<ConflictResolutionStrategy>,
    ) -> Result<FileDescriptor> {
        let timestamps = self.backend.timestamps(&file.uid).await?;
        let verdict = timestamps.resolve(strategy.unwrap_or_default());
        debug!(?timestamps, ?verdict, ?resolution, "Resolved sync direction");

        match (verdict, resolution) {
            (SyncResolution::Equal, _) => Ok(file.clone()),
            (SyncResolution::Local, _) => {
                self.progress.set(&file.uid, SyncProgressStatus::Uploading);
                self.backend.upload(file).await
            }
            (SyncResolution::Remote, _) => {
                self.progress.set(&file.uid, SyncProgressStatus::Downloading);
                self.backend.download(file).await
            }
            (SyncResolution::Error, Some(ConflictResolutionStrategy::ResolveWithLocalFile)) => {
                self.progress.set(&file.uid, SyncProgressStatus::Uploading);
                self.backend.resolve_with_local(file).await
            }
            (SyncResolution::Error, Some(ConflictResolutionStrategy::ResolveWithRemoteFile)) => {
                self.progress.set(&file.uid, SyncProgressStatus::Downloading);
                self.backend.resolve_with_remote(file).await
            }
            (SyncResolution::Error, None) => Err(SyncError::NeedsResolution {
                uid: file.uid.clone(),
            }),
        }
    }
}

#[async_trait]
impl<B: SyncBackend> SyncProcessor for BackendSyncProcessor<B> {
    fn authority(&self) -> AuthorityKey {
        self.authority.clone()
    }

    fn preferred_strategy(&self) -> SyncStrategy {
        self.backend.preferred_strategy()
    }

    #[instrument(skip(self), fields(authority = %self.authority.redacted()))]
    async fn sync_status_for_file(&self, uid: &str) -> SyncStatus {
        let status = match self.backend.timestamps(uid).await {
            Ok(timestamps) => match timestamps.resolve(self.backend.preferred_strategy()) {
                SyncResolution::Equal => SyncStatus::NoChanges,
                SyncResolution::Local => SyncStatus::LocalChanges,
                SyncResolution::Remote => SyncStatus::RemoteChanges,
                SyncResolution::Error => SyncStatus::Conflict,
            },
            Err(e) => {
                warn!(error = %e, "Failed to compute sync status");
                e.status()
            }
        };
        self.cache_status(uid, status);
        status
    }

    fn cached_sync_status(&self, uid: &str) -> Option<SyncStatus> {
        lock(&self.statuses).get(uid).copied()
    }

    fn sync_progress_for_file(&self, uid: &str) -> SyncProgressStatus {
        self.progress.get(uid)
    }

    async fn sync_conflict_for_file(&self, uid: &str) -> Result<SyncConflict> {
        let status = match self.cached_sync_status(uid) {
            Some(status) => status,
            None => self.sync_status_for_file(uid).await,
        };
        if status != SyncStatus::Conflict {
            return Err(SyncError::NoConflict {
                uid: uid.to_string(),
                status,
            });
        }
        self.backend.conflict(uid).await
    }

    async fn revision(&self, uid: &str) -> Result<Option<String>> {
        self.backend.revision(uid).await
    }

    #[instrument(skip(self, file), fields(authority = %self.authority.redacted(), uid = %file.uid))]
    async fn process(
        &self,
        file: &FileDescriptor,
        strategy: Option<SyncStrategy>,
        resolution: Option<ConflictResolutionStrategy>,
    ) -> Result<FileDescriptor> {
        let _guard = self.begin(&file.uid)?;
        self.progress.set(&file.uid, SyncProgressStatus::Syncing);

        let result = self.reconcile(file, strategy, resolution).await;
        match &result {
            Ok(_) => {
                info!("File synchronized");
                self.cache_status(&file.uid, SyncStatus::NoChanges);
            }
            Err(e) => {
                warn!(error = %e, retryable = e.is_retryable(), "Sync failed");
                self.cache_status(&file.uid, e.status());
            }
        }
        result
    }
}

/// Releases the per-uid claim and returns progress to `Idle`
struct ProcessGuard<'a> {
    uid: String,
    active: &'a Mutex<HashSet<String>>,
    progress: &'a ProgressTracker,
}

impl Drop for ProcessGuard<'_> {
    fn drop(&mut self) {
        self.progress.set(&self.uid, SyncProgressStatus::Idle);
        lock(self.active).remove(&self.uid);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
