//! File System Provider Abstractions
//!
//! One [`FileSystemProvider`] exists per backend instance. It exposes the
//! same file operations whatever the storage medium, plus the
//! [`SyncProcessor`] that reconciles its files.
//!
//! # Example
//!
//! ```ignore
//! use core_fs::FileSystemProvider;
//!
//! async fn save(provider: &dyn FileSystemProvider, path: &str, data: Bytes) -> Result<bool> {
//!     let file = provider.get_file(path).await?;
//!     let outcome = provider.open_file_for_write(&file, data).await?;
//!     Ok(outcome.is_deferred())
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use core_sync::{FileDescriptor, FsAuthority, Result, SyncProcessor, WriteOutcome};

use crate::authenticator::Authenticator;

/// Uniform file operations over one backend instance
///
/// Every operation reports failures as [`SyncError`](core_sync::SyncError);
/// none panic.
#[async_trait]
pub trait FileSystemProvider: Send + Sync {
    fn authenticator(&self) -> Arc<dyn Authenticator>;

    fn sync_processor(&self) -> Arc<dyn SyncProcessor>;

    /// Direct children of `dir`
    async fn list_files(&self, dir: &FileDescriptor) -> Result<Vec<FileDescriptor>>;

    /// Parent directory of `file`; `None` for the root
    async fn get_parent(&self, file: &FileDescriptor) -> Result<Option<FileDescriptor>>;

    async fn get_root_file(&self) -> Result<FileDescriptor>;

    /// Descriptor for `path`, relative to the backend root
    ///
    /// The file does not have to exist yet.
    async fn get_file(&self, path: &str) -> Result<FileDescriptor>;

    async fn exists(&self, file: &FileDescriptor) -> Result<bool>;

    /// Full contents of `file`
    async fn open_file_for_read(&self, file: &FileDescriptor) -> Result<Bytes>;

    /// Replace the contents of `file`
    ///
    /// Returns [`WriteOutcome::Deferred`] when the bytes only reached the
    /// local copy and wait for the next sync.
    async fn open_file_for_write(&self, file: &FileDescriptor, data: Bytes) -> Result<WriteOutcome>;
}

/// Builds providers of one [`FsType`](core_sync::FsType)
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn create(&self, authority: &FsAuthority) -> Result<Arc<dyn FileSystemProvider>>;
}
