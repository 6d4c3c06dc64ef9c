//! # Local File System Provider
//!
//! [`FileSystemProvider`] over a directory on the local disk. The authority
//! location is the root directory; uids and paths are root-relative.
//!
//! Writes go to a temporary sibling that is renamed over the target, so a
//! reader never observes a half-written database. They are
//! [`WriteOutcome::Immediate`].

use std::fs::Metadata;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use core_fs::path::{child, modified_millis, normalize, parent, resolve};
use core_fs::{Authenticator, CredentialAuthenticator, FileSystemProvider, ProviderFactory};
use core_runtime::events::EventBus;
use core_runtime::logging::strip_path;
use core_sync::{
    BackendSyncProcessor, FileDescriptor, FsAuthority, FsType, Result, SyncError, SyncProcessor,
    WriteOutcome,
};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::backend::LocalSyncBackend;

pub struct LocalFileSystemProvider {
    authority: FsAuthority,
    authenticator: Arc<CredentialAuthenticator>,
    processor: Arc<BackendSyncProcessor<LocalSyncBackend>>,
}

impl LocalFileSystemProvider {
    pub fn new(authority: &FsAuthority, event_bus: EventBus) -> Self {
        let backend = LocalSyncBackend::new(PathBuf::from(&authority.location));
        Self {
            authority: authority.with_credentials(None),
            authenticator: Arc::new(CredentialAuthenticator::new(authority)),
            processor: Arc::new(BackendSyncProcessor::new(authority.key(), backend, event_bus)),
        }
    }

    fn backend(&self) -> &LocalSyncBackend {
        self.processor.backend()
    }

    fn root(&self) -> FileDescriptor {
        FileDescriptor::root(self.authority.clone(), "", "")
    }

    fn describe(&self, path: &str, metadata: Option<&Metadata>) -> FileDescriptor {
        let file = FileDescriptor::new(self.authority.clone(), path, path);
        match metadata {
            Some(metadata) => file
                .with_directory(metadata.is_dir())
                .with_modified(modified_millis(metadata)),
            None => file,
        }
    }
}

#[async_trait]
impl FileSystemProvider for LocalFileSystemProvider {
    fn authenticator(&self) -> Arc<dyn Authenticator> {
        self.authenticator.clone()
    }

    fn sync_processor(&self) -> Arc<dyn SyncProcessor> {
        self.processor.clone()
    }

    #[instrument(skip(self, dir), fields(dir = %dir.path))]
    async fn list_files(&self, dir: &FileDescriptor) -> Result<Vec<FileDescriptor>> {
        let base = normalize(&dir.path)?;
        let mut entries = tokio::fs::read_dir(resolve(self.backend().root(), &base)).await?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let metadata = entry.metadata().await?;
            files.push(self.describe(&child(&base, &name), Some(&metadata)));
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(count = files.len(), "Listed directory");
        Ok(files)
    }

    async fn get_parent(&self, file: &FileDescriptor) -> Result<Option<FileDescriptor>> {
        let path = normalize(&file.path)?;
        if file.is_root || path.is_empty() {
            return Ok(None);
        }
        match parent(&path) {
            "" => Ok(Some(self.root())),
            dir => Ok(Some(self.describe(dir, None).with_directory(true))),
        }
    }

    async fn get_root_file(&self) -> Result<FileDescriptor> {
        Ok(self.root())
    }

    async fn get_file(&self, path: &str) -> Result<FileDescriptor> {
        let path = normalize(path)?;
        if path.is_empty() {
            return Ok(self.root());
        }
        let metadata = match tokio::fs::metadata(self.backend().locate(&path)?).await {
            Ok(metadata) => Some(metadata),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        Ok(self.describe(&path, metadata.as_ref()))
    }

    async fn exists(&self, file: &FileDescriptor) -> Result<bool> {
        let absolute = self.backend().locate(&file.path)?;
        Ok(tokio::fs::try_exists(absolute).await?)
    }

    async fn open_file_for_read(&self, file: &FileDescriptor) -> Result<Bytes> {
        let absolute = self.backend().locate(&file.uid)?;
        match tokio::fs::read(&absolute).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(SyncError::FileNotFound(file.uid.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, file, data), fields(uid = %file.uid, bytes = data.len()))]
    async fn open_file_for_write(&self, file: &FileDescriptor, data: Bytes) -> Result<WriteOutcome> {
        let uid = normalize(&file.uid)?;
        if uid.is_empty() {
            return Err(SyncError::FileAccess("cannot write to the root directory".to_string()));
        }
        let target = self.backend().locate(&uid)?;
        let directory = resolve(self.backend().root(), parent(&uid));
        tokio::fs::create_dir_all(&directory).await?;

        let staging = directory.join(format!(".{}.tmp", Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&staging, &data).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }
        debug!(file = %strip_path(&target.to_string_lossy()), "Written");
        Ok(WriteOutcome::Immediate)
    }
}

/// Creates a [`LocalFileSystemProvider`] per root directory
pub struct LocalProviderFactory {
    event_bus: EventBus,
}

impl LocalProviderFactory {
    pub fn new(event_bus: EventBus) -> Self {
        Self { event_bus }
    }
}

#[async_trait]
impl ProviderFactory for LocalProviderFactory {
    async fn create(&self, authority: &FsAuthority) -> Result<Arc<dyn FileSystemProvider>> {
        if authority.fs_type != FsType::Local {
            return Err(SyncError::ProviderNotRegistered(authority.fs_type));
        }
        Ok(Arc::new(LocalFileSystemProvider::new(
            authority,
            self.event_bus.clone(),
        )))
    }
}
