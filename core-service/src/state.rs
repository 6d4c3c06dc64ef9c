//! # Database Sync State
//!
//! Folds commit and progress notifications for the open database into one
//! [`SyncState`] published through a `tokio::sync::watch` channel.
//!
//! ## Transitions
//!
//! - `database_opened` queries the processor and publishes a fresh state
//! - a deferred commit while the state is `NoChanges` flips it to
//!   `LocalChanges` without asking the backend
//! - a progress notification for the open file re-queries status, progress
//!   and revision; an active progress is published first from memory, since
//!   the query waits for the backend the running sync holds
//! - `database_closed` publishes `None`
//!
//! A state is republished only when it differs from the current one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use core_fs::FileSystemResolver;
use core_runtime::events::{
    CommitOutcome, CoreEvent, DatabaseEvent, EventBus, Receiver, RecvError, SyncEvent,
    SyncProgressStatus,
};
use core_sync::{FileDescriptor, Result, SyncProcessor, SyncState, SyncStatus};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

/// Observer of the open database's sync state
///
/// Must be created inside a tokio runtime; it spawns the task listening on
/// the event bus and aborts it on drop.
pub struct DatabaseSyncStateProvider {
    inner: Arc<StateInner>,
    listener: JoinHandle<()>,
}

struct StateInner {
    resolver: Arc<FileSystemResolver>,
    open: Mutex<Option<OpenDatabase>>,
    generation: AtomicU64,
    state: watch::Sender<Option<SyncState>>,
}

#[derive(Clone)]
struct OpenDatabase {
    file: FileDescriptor,
    authority: String,
    /// Distinct per open, so a slow query for a previous database never
    /// publishes
    generation: u64,
}

impl OpenDatabase {
    fn matches(&self, authority: &str, uid: &str) -> bool {
        self.authority == authority && self.file.uid == uid
    }
}

impl DatabaseSyncStateProvider {
    pub fn new(resolver: Arc<FileSystemResolver>, event_bus: &EventBus) -> Self {
        let (state, _) = watch::channel(None);
        let inner = Arc::new(StateInner {
            resolver,
            open: Mutex::new(None),
            generation: AtomicU64::new(0),
            state,
        });
        let listener = tokio::spawn(listen(Arc::clone(&inner), event_bus.subscribe()));
        Self { inner, listener }
    }

    /// Receiver of every published state
    pub fn subscribe(&self) -> watch::Receiver<Option<SyncState>> {
        self.inner.state.subscribe()
    }

    /// Last published state
    pub fn state(&self) -> Option<SyncState> {
        self.inner.state.borrow().clone()
    }

    /// File whose state is tracked
    pub fn open_file(&self) -> Option<FileDescriptor> {
        self.inner.current().map(|open| open.file)
    }

    /// Track `file` and publish its current state
    #[instrument(skip(self, file), fields(uid = %file.uid))]
    pub async fn database_opened(&self, file: &FileDescriptor) -> Result<SyncState> {
        let processor = self
            .inner
            .resolver
            .resolve_sync_processor(&file.fs_authority)
            .await?;

        let open = OpenDatabase {
            file: file.clone(),
            authority: file.fs_authority.key().to_string(),
            generation: self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1,
        };
        *lock(&self.inner.open) = Some(open.clone());

        let state = query(processor.as_ref(), &file.uid).await;
        if self.inner.is_current(&open) {
            self.inner.state.send_replace(Some(state.clone()));
        }
        Ok(state)
    }

    /// Stop tracking and reset the state to `None`
    pub fn database_closed(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        *lock(&self.inner.open) = None;
        self.inner.state.send_replace(None);
        debug!("Database closed");
    }
}

impl Drop for DatabaseSyncStateProvider {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

impl StateInner {
    fn current(&self) -> Option<OpenDatabase> {
        lock(&self.open).clone()
    }

    fn is_current(&self, open: &OpenDatabase) -> bool {
        lock(&self.open)
            .as_ref()
            .is_some_and(|current| current.generation == open.generation)
    }

    /// Replace the state through `update`, notifying only on change
    fn publish(&self, open: &OpenDatabase, update: impl FnOnce(&SyncState) -> SyncState) {
        if !self.is_current(open) {
            return;
        }
        self.state.send_if_modified(|current| {
            let Some(previous) = current.as_ref() else {
                return false;
            };
            let next = update(previous);
            if &next == previous {
                return false;
            }
            debug!(status = %next.status, progress = ?next.progress, "Sync state changed");
            *current = Some(next);
            true
        });
    }

    fn on_committed(&self, authority: &str, uid: &str, outcome: &CommitOutcome) {
        let Some(open) = self.current().filter(|open| open.matches(authority, uid)) else {
            return;
        };
        if *outcome != CommitOutcome::Deferred {
            return;
        }
        self.publish(&open, |state| {
            if state.status == SyncStatus::NoChanges {
                SyncState {
                    status: SyncStatus::LocalChanges,
                    ..state.clone()
                }
            } else {
                state.clone()
            }
        });
    }

    async fn on_progress(&self, authority: &str, uid: &str, progress: SyncProgressStatus) {
        let Some(open) = self.current().filter(|open| open.matches(authority, uid)) else {
            return;
        };
        let processor = match self.resolver.resolve_sync_processor(&open.file.fs_authority).await {
            Ok(processor) => processor,
            Err(e) => {
                warn!(error = %e, "No processor for the open database");
                return;
            }
        };

        if progress.is_active() {
            let cached = processor.cached_sync_status(uid);
            self.publish(&open, |state| SyncState {
                status: cached.unwrap_or(state.status),
                progress,
                revision: state.revision.clone(),
            });
        }
        let fresh = query(processor.as_ref(), uid).await;
        self.publish(&open, |_| fresh);
    }

    /// Re-query after missed notifications
    async fn resynchronize(&self) {
        let Some(open) = self.current() else {
            return;
        };
        let processor = match self.resolver.resolve_sync_processor(&open.file.fs_authority).await {
            Ok(processor) => processor,
            Err(_) => return,
        };
        let fresh = query(processor.as_ref(), &open.file.uid).await;
        self.publish(&open, |_| fresh);
    }
}

async fn listen(inner: Arc<StateInner>, mut events: Receiver<CoreEvent>) {
    loop {
        match events.recv().await {
            Ok(CoreEvent::Database(DatabaseEvent::Committed {
                authority,
                uid,
                outcome,
            })) => inner.on_committed(&authority, &uid, &outcome),
            Ok(CoreEvent::Sync(SyncEvent::ProgressChanged {
                authority,
                uid,
                progress,
            })) => inner.on_progress(&authority, &uid, progress).await,
            Ok(CoreEvent::Auth(_)) => {}
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "Sync state listener lagged, re-querying");
                inner.resynchronize().await;
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn query(processor: &dyn SyncProcessor, uid: &str) -> SyncState {
    let status = processor.sync_status_for_file(uid).await;
    let revision = match processor.revision(uid).await {
        Ok(revision) => revision,
        Err(e) => {
            debug!(error = %e, "Revision unavailable");
            None
        }
    };
    SyncState {
        status,
        progress: processor.sync_progress_for_file(uid),
        revision,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{authority, vault, MockProcessor, StubProvider};
    use async_trait::async_trait;
    use core_fs::{FileSystemProvider, ProviderFactory};
    use core_sync::{FsAuthority, FsType, SyncError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    // ============================================================================
    // Fixtures
    // ============================================================================

    struct SharedFactory(Arc<StubProvider>);

    #[async_trait]
    impl ProviderFactory for SharedFactory {
        async fn create(&self, _authority: &FsAuthority) -> Result<Arc<dyn FileSystemProvider>> {
            Ok(self.0.clone())
        }
    }

    /// Processor whose n-th status query returns `statuses[n]` (the last
    /// entry repeats); returns the processor and the query counter
    fn processor(statuses: Vec<SyncStatus>) -> (MockProcessor, Arc<AtomicUsize>) {
        processor_with_progress(statuses, Arc::new(Mutex::new(SyncProgressStatus::Idle)))
    }

    /// Same, reporting whatever progress `live` holds
    fn processor_with_progress(
        statuses: Vec<SyncStatus>,
        live: Arc<Mutex<SyncProgressStatus>>,
    ) -> (MockProcessor, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut processor = MockProcessor::new();
        processor
            .expect_sync_status_for_file()
            .returning(move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                statuses[n.min(statuses.len() - 1)]
            });
        processor
            .expect_revision()
            .returning(|_| Ok(Some("rev-1".to_string())));
        processor
            .expect_sync_progress_for_file()
            .returning(move |_| *live.lock().unwrap());
        processor.expect_cached_sync_status().returning(|_| None);
        (processor, calls)
    }

    fn provider_with(processor: MockProcessor) -> (DatabaseSyncStateProvider, EventBus) {
        let bus = EventBus::new(32);
        let mut resolver = FileSystemResolver::new();
        resolver.register(
            FsType::Git,
            Arc::new(SharedFactory(Arc::new(StubProvider::new(processor)))),
        );
        (DatabaseSyncStateProvider::new(Arc::new(resolver), &bus), bus)
    }

    fn progress(progress: SyncProgressStatus) -> CoreEvent {
        CoreEvent::Sync(SyncEvent::ProgressChanged {
            authority: authority().key().to_string(),
            uid: "vault.kdbx".to_string(),
            progress,
        })
    }

    fn committed(outcome: CommitOutcome) -> CoreEvent {
        CoreEvent::Database(DatabaseEvent::Committed {
            authority: authority().key().to_string(),
            uid: "vault.kdbx".to_string(),
            outcome,
        })
    }

    async fn next_state(rx: &mut watch::Receiver<Option<SyncState>>) -> Option<SyncState> {
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("no state published")
            .unwrap();
        rx.borrow_and_update().clone()
    }

    async fn wait_for_queries(calls: &AtomicUsize, expected: usize) {
        for _ in 0..100 {
            if calls.load(Ordering::SeqCst) >= expected {
                tokio::time::sleep(Duration::from_millis(20)).await;
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("status was queried {} times", calls.load(Ordering::SeqCst));
    }

    // ============================================================================
    // Tests
    // ============================================================================

    #[tokio::test]
    async fn test_open_publishes_fresh_state() {
        let (processor, _) = processor(vec![SyncStatus::RemoteChanges]);
        let (provider, _bus) = provider_with(processor);
        let mut rx = provider.subscribe();
        assert_eq!(provider.state(), None);

        let state = provider.database_opened(&vault()).await.unwrap();

        let expected = SyncState {
            status: SyncStatus::RemoteChanges,
            progress: SyncProgressStatus::Idle,
            revision: Some("rev-1".to_string()),
        };
        assert_eq!(state, expected);
        assert_eq!(next_state(&mut rx).await, Some(expected));
        assert_eq!(provider.open_file(), Some(vault()));
    }

    #[tokio::test]
    async fn test_deferred_commit_flips_to_local_changes() {
        let (processor, calls) = processor(vec![SyncStatus::NoChanges]);
        let (provider, bus) = provider_with(processor);
        provider.database_opened(&vault()).await.unwrap();
        let mut rx = provider.subscribe();

        bus.emit(committed(CommitOutcome::Deferred)).unwrap();

        let state = next_state(&mut rx).await.unwrap();
        assert_eq!(state.status, SyncStatus::LocalChanges);
        assert_eq!(state.revision.as_deref(), Some("rev-1"));
        // Only the query made by database_opened
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_immediate_commit_keeps_state() {
        let (processor, calls) = processor(vec![SyncStatus::NoChanges]);
        let (provider, bus) = provider_with(processor);
        provider.database_opened(&vault()).await.unwrap();
        let mut rx = provider.subscribe();

        bus.emit(committed(CommitOutcome::Immediate)).unwrap();
        // Sync point: the idle notification behind it forces one query
        bus.emit(progress(SyncProgressStatus::Idle)).unwrap();
        wait_for_queries(&calls, 2).await;

        assert!(!rx.has_changed().unwrap());
        assert_eq!(provider.state().unwrap().status, SyncStatus::NoChanges);
    }

    #[tokio::test]
    async fn test_progress_updates_and_idle_requeries() {
        let live = Arc::new(Mutex::new(SyncProgressStatus::Idle));
        let (processor, calls) = processor_with_progress(
            vec![
                SyncStatus::LocalChanges,
                SyncStatus::LocalChanges,
                SyncStatus::NoChanges,
            ],
            Arc::clone(&live),
        );
        let (provider, bus) = provider_with(processor);
        provider.database_opened(&vault()).await.unwrap();
        let mut rx = provider.subscribe();

        *live.lock().unwrap() = SyncProgressStatus::Uploading;
        bus.emit(progress(SyncProgressStatus::Uploading)).unwrap();
        let state = next_state(&mut rx).await.unwrap();
        assert_eq!(state.progress, SyncProgressStatus::Uploading);
        assert_eq!(state.status, SyncStatus::LocalChanges);

        // The query behind the active progress agrees, nothing new published
        wait_for_queries(&calls, 2).await;
        assert!(!rx.has_changed().unwrap());

        *live.lock().unwrap() = SyncProgressStatus::Idle;
        bus.emit(progress(SyncProgressStatus::Idle)).unwrap();
        let state = next_state(&mut rx).await.unwrap();
        assert_eq!(state.progress, SyncProgressStatus::Idle);
        assert_eq!(state.status, SyncStatus::NoChanges);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_active_progress_requeries_status() {
        let live = Arc::new(Mutex::new(SyncProgressStatus::Idle));
        let (processor, calls) = processor_with_progress(
            vec![SyncStatus::LocalChanges, SyncStatus::RemoteChanges],
            Arc::clone(&live),
        );
        let (provider, bus) = provider_with(processor);
        provider.database_opened(&vault()).await.unwrap();
        let mut rx = provider.subscribe();

        *live.lock().unwrap() = SyncProgressStatus::Syncing;
        bus.emit(progress(SyncProgressStatus::Syncing)).unwrap();

        // The in-memory publish and the query may coalesce in the channel
        let mut fresh = next_state(&mut rx).await.unwrap();
        while fresh.status != SyncStatus::RemoteChanges {
            fresh = next_state(&mut rx).await.unwrap();
        }
        assert_eq!(fresh.progress, SyncProgressStatus::Syncing);
        assert_eq!(fresh.status, SyncStatus::RemoteChanges);
        assert_eq!(fresh.revision.as_deref(), Some("rev-1"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unchanged_state_is_not_republished() {
        let (processor, calls) = processor(vec![SyncStatus::NoChanges]);
        let (provider, bus) = provider_with(processor);
        provider.database_opened(&vault()).await.unwrap();
        let mut rx = provider.subscribe();

        bus.emit(progress(SyncProgressStatus::Idle)).unwrap();
        wait_for_queries(&calls, 2).await;

        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_events_for_other_files_are_ignored() {
        let (processor, calls) = processor(vec![SyncStatus::NoChanges]);
        let (provider, bus) = provider_with(processor);
        provider.database_opened(&vault()).await.unwrap();
        let mut rx = provider.subscribe();

        bus.emit(CoreEvent::Database(DatabaseEvent::Committed {
            authority: authority().key().to_string(),
            uid: "other.kdbx".to_string(),
            outcome: CommitOutcome::Deferred,
        }))
        .unwrap();
        bus.emit(CoreEvent::Sync(SyncEvent::ProgressChanged {
            authority: "local:/home/alice".to_string(),
            uid: "vault.kdbx".to_string(),
            progress: SyncProgressStatus::Syncing,
        }))
        .unwrap();
        bus.emit(progress(SyncProgressStatus::Idle)).unwrap();
        wait_for_queries(&calls, 2).await;

        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_close_resets_state() {
        let (processor, calls) = processor(vec![SyncStatus::NoChanges]);
        let (provider, bus) = provider_with(processor);
        provider.database_opened(&vault()).await.unwrap();

        provider.database_closed();
        assert_eq!(provider.state(), None);
        assert_eq!(provider.open_file(), None);

        bus.emit(committed(CommitOutcome::Deferred)).unwrap();
        bus.emit(progress(SyncProgressStatus::Idle)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(provider.state(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_on_unregistered_backend_fails() {
        let (processor, _) = processor(vec![SyncStatus::NoChanges]);
        let (provider, _bus) = provider_with(processor);

        let local = FileDescriptor::new(FsAuthority::local("/tmp"), "vault.kdbx", "vault.kdbx");
        let err = provider.database_opened(&local).await.unwrap_err();
        assert!(matches!(err, SyncError::ProviderNotRegistered(FsType::Local)));
    }
}
