//! # Database Committer
//!
//! Single write path for the open database.
//!
//! Commits and reconciliations take the same async lock, so a download that
//! replaces the local copy never interleaves with a save coming from the UI.
//! Every commit, successful or not, is announced as
//! [`DatabaseEvent::Committed`].

use bytes::Bytes;
use core_fs::FileSystemProvider;
use core_runtime::events::{CommitOutcome, CoreEvent, DatabaseEvent, EventBus};
use core_sync::{
    ConflictResolutionStrategy, FileDescriptor, Result, SyncProcessor, SyncStrategy, WriteOutcome,
};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

pub struct DatabaseCommitter {
    event_bus: EventBus,
    lock: Mutex<()>,
}

impl DatabaseCommitter {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            event_bus,
            lock: Mutex::new(()),
        }
    }

    /// Write `data` as the new contents of `file`
    #[instrument(skip(self, provider, file, data), fields(uid = %file.uid, bytes = data.len()))]
    pub async fn commit(
        &self,
        provider: &dyn FileSystemProvider,
        file: &FileDescriptor,
        data: Bytes,
    ) -> Result<WriteOutcome> {
        let _guard = self.lock.lock().await;
        self.write(provider, file, data).await
    }

    /// Read the current contents of `file`, transform them with `mutate` and
    /// write the result back, all under the commit lock
    #[instrument(skip(self, provider, file, mutate), fields(uid = %file.uid))]
    pub async fn update<F>(
        &self,
        provider: &dyn FileSystemProvider,
        file: &FileDescriptor,
        mutate: F,
    ) -> Result<WriteOutcome>
    where
        F: FnOnce(Bytes) -> Result<Bytes> + Send,
    {
        let _guard = self.lock.lock().await;
        let current = provider.open_file_for_read(file).await?;
        let next = mutate(current)?;
        self.write(provider, file, next).await
    }

    /// Reconcile `file` once no commit is in flight
    pub async fn synchronize(
        &self,
        processor: &dyn SyncProcessor,
        file: &FileDescriptor,
        strategy: Option<SyncStrategy>,
        resolution: Option<ConflictResolutionStrategy>,
    ) -> Result<FileDescriptor> {
        let _guard = self.lock.lock().await;
        processor.process(file, strategy, resolution).await
    }

    async fn write(
        &self,
        provider: &dyn FileSystemProvider,
        file: &FileDescriptor,
        data: Bytes,
    ) -> Result<WriteOutcome> {
        let result = provider.open_file_for_write(file, data).await;
        let outcome = match &result {
            Ok(WriteOutcome::Immediate) => CommitOutcome::Immediate,
            Ok(WriteOutcome::Deferred) => CommitOutcome::Deferred,
            Err(e) => {
                warn!(error = %e, "Commit failed");
                CommitOutcome::Failed {
                    message: e.to_string(),
                }
            }
        };
        debug!(?outcome, "Commit finished");

        let _ = self.event_bus.emit(CoreEvent::Database(DatabaseEvent::Committed {
            authority: file.fs_authority.key().to_string(),
            uid: file.uid.clone(),
            outcome,
        }));
        result
    }
}
