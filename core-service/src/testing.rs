//! Test doubles shared by the unit tests of this crate

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use core_fs::{Authenticator, CredentialAuthenticator, FileSystemProvider};
use core_sync::{
    AuthorityKey, ConflictResolutionStrategy, FileDescriptor, FsAuthority, Result, SyncConflict,
    SyncError, SyncProcessor, SyncProgressStatus, SyncStatus, SyncStrategy, WriteOutcome,
};
use mockall::mock;
use tokio::sync::Semaphore;

mock! {
    pub Processor {}

    #[async_trait]
    impl SyncProcessor for Processor {
        fn authority(&self) -> AuthorityKey;
        fn preferred_strategy(&self) -> SyncStrategy;
        async fn sync_status_for_file(&self, uid: &str) -> SyncStatus;
        fn cached_sync_status(&self, uid: &str) -> Option<SyncStatus>;
        fn sync_progress_for_file(&self, uid: &str) -> SyncProgressStatus;
        async fn sync_conflict_for_file(&self, uid: &str) -> Result<SyncConflict>;
        async fn revision(&self, uid: &str) -> Result<Option<String>>;
        async fn process(
            &self,
            file: &FileDescriptor,
            strategy: Option<SyncStrategy>,
            resolution: Option<ConflictResolutionStrategy>,
        ) -> Result<FileDescriptor>;
    }
}

pub fn authority() -> FsAuthority {
    FsAuthority::git("https://example.com/team/vault.git")
}

pub fn vault() -> FileDescriptor {
    FileDescriptor::new(authority(), "vault.kdbx", "vault.kdbx")
}

/// In-memory provider whose writes are deferred until `fail_writes` says
/// otherwise; each write waits for a permit of `write_gate`
pub struct StubProvider {
    pub processor: Arc<MockProcessor>,
    pub authenticator: Arc<CredentialAuthenticator>,
    pub contents: Mutex<Bytes>,
    pub fail_writes: bool,
    pub write_gate: Semaphore,
}

impl StubProvider {
    pub fn new(processor: MockProcessor) -> Self {
        Self {
            processor: Arc::new(processor),
            authenticator: Arc::new(CredentialAuthenticator::new(&authority())),
            contents: Mutex::new(Bytes::new()),
            fail_writes: false,
            write_gate: Semaphore::new(Semaphore::MAX_PERMITS),
        }
    }

    pub fn contents(&self) -> Bytes {
        self.contents.lock().unwrap().clone()
    }
}

fn unsupported<T>() -> Result<T> {
    Err(SyncError::RemoteApi("not supported by the stub".to_string()))
}

#[async_trait]
impl FileSystemProvider for StubProvider {
    fn authenticator(&self) -> Arc<dyn Authenticator> {
        self.authenticator.clone()
    }

    fn sync_processor(&self) -> Arc<dyn SyncProcessor> {
        self.processor.clone()
    }

    async fn list_files(&self, _dir: &FileDescriptor) -> Result<Vec<FileDescriptor>> {
        unsupported()
    }

    async fn get_parent(&self, _file: &FileDescriptor) -> Result<Option<FileDescriptor>> {
        unsupported()
    }

    async fn get_root_file(&self) -> Result<FileDescriptor> {
        unsupported()
    }

    async fn get_file(&self, _path: &str) -> Result<FileDescriptor> {
        Ok(vault())
    }

    async fn exists(&self, _file: &FileDescriptor) -> Result<bool> {
        Ok(true)
    }

    async fn open_file_for_read(&self, _file: &FileDescriptor) -> Result<Bytes> {
        Ok(self.contents())
    }

    async fn open_file_for_write(&self, _file: &FileDescriptor, data: Bytes) -> Result<WriteOutcome> {
        let _permit = self
            .write_gate
            .acquire()
            .await
            .map_err(|e| SyncError::GenericIo(e.to_string()))?;
        if self.fail_writes {
            return Err(SyncError::FileAccess("read-only".to_string()));
        }
        *self.contents.lock().unwrap() = data;
        Ok(WriteOutcome::Deferred)
    }
}
