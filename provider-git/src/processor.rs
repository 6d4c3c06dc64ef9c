//! # Git Sync Backend
//!
//! [`SyncBackend`] over a lazily opened working copy.
//!
//! The first operation opens the working copy remembered for the remote, or
//! clones the remote into `<git_dir>/<uuid>` and remembers that directory.
//! libgit2 calls block, so every operation runs on the blocking pool while
//! holding the repository mutex.
//!
//! File uids are repository-relative paths. The revision token is the local
//! HEAD id.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use core_fs::Authenticator;
use core_runtime::logging::redact_url_credentials;
use core_sync::{
    FileDescriptor, FsAuthority, Result as SyncResult, SyncBackend, SyncConflict, SyncError,
    SyncStrategy, SyncTimestamps,
};
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::client::{Git2Client, GitClient};
use crate::error::{GitError, Result};
use crate::repository::{GitRepository, PathTimestamps};
use crate::store::RepositoryStore;

type SharedRepository = Arc<Mutex<GitRepository<Git2Client>>>;

/// Commit identity for commits created on behalf of the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitAuthor {
    pub name: String,
    pub email: String,
}

pub struct GitSyncBackend {
    authority: FsAuthority,
    authenticator: Arc<dyn Authenticator>,
    store: Arc<dyn RepositoryStore>,
    git_dir: PathBuf,
    author: GitAuthor,
    repository: OnceCell<SharedRepository>,
}

impl GitSyncBackend {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        store: Arc<dyn RepositoryStore>,
        git_dir: PathBuf,
        author: GitAuthor,
    ) -> Self {
        Self {
            authority: authenticator.fs_authority().with_credentials(None),
            authenticator,
            store,
            git_dir,
            author,
            repository: OnceCell::new(),
        }
    }

    /// Authority without credentials, as stamped on descriptors
    pub fn authority(&self) -> &FsAuthority {
        &self.authority
    }

    async fn repository(&self) -> Result<SharedRepository> {
        let repository = self
            .repository
            .get_or_try_init(|| self.open_or_clone())
            .await?;
        Ok(Arc::clone(repository))
    }

    #[instrument(skip(self), fields(remote = %redact_url_credentials(&self.authority.location)))]
    async fn open_or_clone(&self) -> Result<SharedRepository> {
        let key = self.authority.key();
        let remembered = self.store.get(&key).await?;

        let url = self.authority.location.clone();
        let git_dir = self.git_dir.clone();
        let authenticator = Arc::clone(&self.authenticator);
        let author = self.author.clone();

        let (client, path, cloned) = tokio::task::spawn_blocking(move || {
            open_or_clone_blocking(remembered, &url, &git_dir, authenticator, &author)
        })
        .await
        .map_err(|e| GitError::Task(e.to_string()))??;

        if cloned {
            self.store.put(&key, &path).await?;
        }
        info!(path = %path.display(), cloned, "Working copy ready");
        Ok(Arc::new(Mutex::new(GitRepository::new(client))))
    }

    /// Run `operation` on the blocking pool with the repository locked
    pub async fn with_repository<T, F>(&self, operation: F) -> Result<T>
    where
        F: FnOnce(&GitRepository<Git2Client>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let repository = self.repository().await?;
        tokio::task::spawn_blocking(move || {
            let guard = lock(&repository);
            operation(&guard)
        })
        .await
        .map_err(|e| GitError::Task(e.to_string()))?
    }

    /// Root of the working tree
    pub async fn workdir(&self) -> Result<PathBuf> {
        self.with_repository(|repository| Ok(repository.client().workdir()))
            .await
    }

    fn descriptor(&self, uid: &str, modified: Option<i64>) -> FileDescriptor {
        FileDescriptor::new(self.authority.clone(), uid, uid).with_modified(modified)
    }
}

fn open_or_clone_blocking(
    remembered: Option<PathBuf>,
    url: &str,
    git_dir: &Path,
    authenticator: Arc<dyn Authenticator>,
    author: &GitAuthor,
) -> Result<(Git2Client, PathBuf, bool)> {
    let identity = (author.name.as_str(), author.email.as_str());
    if let Some(path) = remembered {
        match Git2Client::open(&path, Arc::clone(&authenticator), identity) {
            Ok(client) => return Ok((client, path, false)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Working copy unusable, cloning again");
            }
        }
    }

    fs::create_dir_all(git_dir)?;
    let path = git_dir.join(Uuid::new_v4().to_string());
    let client = Git2Client::clone_into(url, &path, authenticator, identity)?;
    Ok((client, path, true))
}

fn into_sync_timestamps(uid: &str, timestamps: PathTimestamps) -> SyncResult<SyncTimestamps> {
    if timestamps.local.is_none() && timestamps.remote.is_none() {
        return Err(SyncError::FileNotFound(uid.to_string()));
    }
    Ok(SyncTimestamps {
        local: timestamps.local,
        cached_remote: timestamps.cached_remote,
        remote: timestamps.remote,
    })
}

#[async_trait]
impl SyncBackend for GitSyncBackend {
    async fn timestamps(&self, uid: &str) -> SyncResult<SyncTimestamps> {
        let path = uid.to_string();
        let timestamps = self
            .with_repository(move |repository| repository.timestamps(&path))
            .await?;
        into_sync_timestamps(uid, timestamps)
    }

    async fn upload(&self, file: &FileDescriptor) -> SyncResult<FileDescriptor> {
        let path = file.uid.clone();
        let timestamps = self
            .with_repository(move |repository| {
                // Held in memory across the reset the upload may need
                let data = repository.read_file(&path)?;
                repository.upload(&path, &data)?;
                repository.read_timestamps(&path)
            })
            .await?;
        Ok(file.clone().with_modified(timestamps.local))
    }

    async fn download(&self, file: &FileDescriptor) -> SyncResult<FileDescriptor> {
        let path = file.uid.clone();
        let timestamps = self
            .with_repository(move |repository| repository.download(&path))
            .await?;
        Ok(file.clone().with_modified(timestamps.local))
    }

    async fn resolve_with_local(&self, file: &FileDescriptor) -> SyncResult<FileDescriptor> {
        let path = file.uid.clone();
        let timestamps = self
            .with_repository(move |repository| {
                let data = repository.read_file(&path)?;
                repository.overwrite_remote(&path, &data)?;
                repository.read_timestamps(&path)
            })
            .await?;
        Ok(file.clone().with_modified(timestamps.local))
    }

    async fn resolve_with_remote(&self, file: &FileDescriptor) -> SyncResult<FileDescriptor> {
        let path = file.uid.clone();
        let timestamps = self
            .with_repository(move |repository| repository.discard_local(&path))
            .await?;
        Ok(file.clone().with_modified(timestamps.local))
    }

    async fn conflict(&self, uid: &str) -> SyncResult<SyncConflict> {
        let timestamps = self.timestamps(uid).await?;
        Ok(SyncConflict {
            local: self.descriptor(uid, timestamps.local),
            remote: self.descriptor(uid, timestamps.remote),
        })
    }

    async fn revision(&self, _uid: &str) -> SyncResult<Option<String>> {
        Ok(self
            .with_repository(|repository| repository.revision())
            .await?)
    }

    fn preferred_strategy(&self) -> SyncStrategy {
        SyncStrategy::LastRemoteModificationWins
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
