//! Sync backend for a plain directory
//!
//! A local directory is its own remote. All three timestamps are the file's
//! modification time, so every file reports `NoChanges` and `process()`
//! returns its input untouched.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use core_fs::path::{modified_millis, normalize, resolve};
use core_sync::{
    FileDescriptor, Result, SyncBackend, SyncConflict, SyncError, SyncStatus, SyncStrategy,
    SyncTimestamps,
};
use tracing::debug;

pub struct LocalSyncBackend {
    root: PathBuf,
}

impl LocalSyncBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of `uid`, rejecting paths that leave the root
    pub fn locate(&self, uid: &str) -> Result<PathBuf> {
        Ok(resolve(&self.root, &normalize(uid)?))
    }

    async fn modified(&self, uid: &str) -> Result<i64> {
        let absolute = self.locate(uid)?;
        let metadata = match tokio::fs::metadata(&absolute).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SyncError::FileNotFound(uid.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        modified_millis(&metadata).ok_or_else(|| {
            SyncError::GenericIo(format!("no modification time for {}", absolute.display()))
        })
    }
}

#[async_trait]
impl SyncBackend for LocalSyncBackend {
    async fn timestamps(&self, uid: &str) -> Result<SyncTimestamps> {
        let modified = self.modified(uid).await?;
        Ok(SyncTimestamps {
            local: Some(modified),
            cached_remote: Some(modified),
            remote: Some(modified),
        })
    }

    async fn upload(&self, file: &FileDescriptor) -> Result<FileDescriptor> {
        let modified = self.modified(&file.uid).await?;
        debug!(uid = %file.uid, "Local file is its own remote");
        Ok(file.clone().with_modified(Some(modified)))
    }

    async fn download(&self, file: &FileDescriptor) -> Result<FileDescriptor> {
        let modified = self.modified(&file.uid).await?;
        Ok(file.clone().with_modified(Some(modified)))
    }

    async fn conflict(&self, uid: &str) -> Result<SyncConflict> {
        Err(SyncError::NoConflict {
            uid: uid.to_string(),
            status: SyncStatus::NoChanges,
        })
    }

    /// Modification time of the file, so a changed file gets a new token
    async fn revision(&self, uid: &str) -> Result<Option<String>> {
        match self.modified(uid).await {
            Ok(modified) => Ok(Some(modified.to_string())),
            Err(SyncError::FileNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn preferred_strategy(&self) -> SyncStrategy {
        SyncStrategy::LastModificationWins
    }
}
