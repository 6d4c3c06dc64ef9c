//! # Git File System Provider
//!
//! Exposes the working tree of a Git remote as a [`FileSystemProvider`].
//!
//! Reads and writes touch the working tree only. A write is therefore
//! [`WriteOutcome::Deferred`]: the bytes reach the remote on the next
//! `process()` of the file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use core_fs::path::{child, modified_millis, normalize, parent, resolve};
use core_fs::{Authenticator, CredentialAuthenticator, FileSystemProvider, ProviderFactory};
use core_runtime::config::CoreConfig;
use core_runtime::events::EventBus;
use core_sync::{
    BackendSyncProcessor, FileDescriptor, FsAuthority, FsType, Result, SyncError, SyncProcessor,
    WriteOutcome,
};
use tracing::{debug, instrument};

use crate::processor::{GitAuthor, GitSyncBackend};
use crate::store::{RepositoryStore, SettingsRepositoryStore};

/// Git metadata directory, never listed
const GIT_DIR_NAME: &str = ".git";

pub struct GitFileSystemProvider {
    authenticator: Arc<CredentialAuthenticator>,
    processor: Arc<BackendSyncProcessor<GitSyncBackend>>,
}

impl GitFileSystemProvider {
    pub fn new(
        authority: &FsAuthority,
        store: Arc<dyn RepositoryStore>,
        git_dir: PathBuf,
        author: GitAuthor,
        event_bus: EventBus,
    ) -> Self {
        let authenticator = Arc::new(CredentialAuthenticator::new(authority));
        let backend = GitSyncBackend::new(authenticator.clone(), store, git_dir, author);
        let processor = Arc::new(BackendSyncProcessor::new(authority.key(), backend, event_bus));
        Self {
            authenticator,
            processor,
        }
    }

    fn backend(&self) -> &GitSyncBackend {
        self.processor.backend()
    }

    fn authority(&self) -> FsAuthority {
        self.backend().authority().clone()
    }

    fn root(&self) -> FileDescriptor {
        FileDescriptor::root(self.authority(), "", "")
    }

    async fn workdir(&self) -> Result<PathBuf> {
        Ok(self.backend().workdir().await?)
    }

    fn describe(&self, path: &str, metadata: Option<&fs::Metadata>) -> FileDescriptor {
        let file = FileDescriptor::new(self.authority(), path, path);
        match metadata {
            Some(metadata) => file
                .with_directory(metadata.is_dir())
                .with_modified(modified_millis(metadata)),
            None => file,
        }
    }
}

#[async_trait]
impl FileSystemProvider for GitFileSystemProvider {
    fn authenticator(&self) -> Arc<dyn Authenticator> {
        self.authenticator.clone()
    }

    fn sync_processor(&self) -> Arc<dyn SyncProcessor> {
        self.processor.clone()
    }

    #[instrument(skip(self, dir), fields(dir = %dir.path))]
    async fn list_files(&self, dir: &FileDescriptor) -> Result<Vec<FileDescriptor>> {
        let workdir = self.workdir().await?;
        let base = normalize(&dir.path)?;
        let absolute = resolve(&workdir, &base);

        let entries = tokio::task::spawn_blocking(move || read_entries(&absolute))
            .await
            .map_err(|e| SyncError::GenericIo(e.to_string()))??;

        let mut files: Vec<_> = entries
            .iter()
            .map(|(name, metadata)| self.describe(&child(&base, name), Some(metadata)))
            .collect();
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
        let absolute = resolve(&self.workdir().await?, &path);
        let metadata = match tokio::fs::metadata(&absolute).await {
            Ok(metadata) => Some(metadata),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        Ok(self.describe(&path, metadata.as_ref()))
    }

    async fn exists(&self, file: &FileDescriptor) -> Result<bool> {
        let path = normalize(&file.path)?;
        let absolute = resolve(&self.workdir().await?, &path);
        Ok(tokio::fs::try_exists(absolute).await?)
    }

    async fn open_file_for_read(&self, file: &FileDescriptor) -> Result<Bytes> {
        let path = normalize(&file.uid)?;
        let data = self
            .backend()
            .with_repository(move |repository| repository.read_file(&path))
            .await?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self, file, data), fields(uid = %file.uid, bytes = data.len()))]
    async fn open_file_for_write(&self, file: &FileDescriptor, data: Bytes) -> Result<WriteOutcome> {
        let path = normalize(&file.uid)?;
        self.backend()
            .with_repository(move |repository| repository.write_file(&path, &data))
            .await?;
        debug!("Stored in working tree");
        Ok(WriteOutcome::Deferred)
    }
}

/// Creates a [`GitFileSystemProvider`] per Git remote
pub struct GitProviderFactory {
    store: Arc<dyn RepositoryStore>,
    git_dir: PathBuf,
    author: GitAuthor,
    event_bus: EventBus,
}

impl GitProviderFactory {
    pub fn new(
        store: Arc<dyn RepositoryStore>,
        git_dir: PathBuf,
        author: GitAuthor,
        event_bus: EventBus,
    ) -> Self {
        Self {
            store,
            git_dir,
            author,
            event_bus,
        }
    }

    /// Factory keeping working copies under `config.git_dir()` and their
    /// locations in `config.settings_store`
    pub fn from_config(config: &CoreConfig, event_bus: EventBus) -> Self {
        Self::new(
            Arc::new(SettingsRepositoryStore::new(config.settings_store.clone())),
            config.git_dir(),
            GitAuthor {
                name: config.git_author_name.clone(),
                email: config.git_author_email.clone(),
            },
            event_bus,
        )
    }
}

#[async_trait]
impl ProviderFactory for GitProviderFactory {
    async fn create(&self, authority: &FsAuthority) -> Result<Arc<dyn FileSystemProvider>> {
        if authority.fs_type != FsType::Git {
            return Err(SyncError::ProviderNotRegistered(authority.fs_type));
        }
        Ok(Arc::new(GitFileSystemProvider::new(
            authority,
            Arc::clone(&self.store),
            self.git_dir.clone(),
            self.author.clone(),
            self.event_bus.clone(),
        )))
    }
}

/// Entries of `dir` except the Git metadata directory
fn read_entries(dir: &Path) -> io::Result<Vec<(String, fs::Metadata)>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == GIT_DIR_NAME {
            continue;
        }
        entries.push((name, entry.metadata()?));
    }
    Ok(entries)
}
