//! # Git Provider
//!
//! Keeps vault files in a Git remote, mirrored into a local working tree.
//!
//! ## Overview
//!
//! - [`GitClient`] / [`Git2Client`]: blocking libgit2 operations on one
//!   working copy (fetch, rebase-pull, commit, push, per-file history)
//! - [`GitRepository`]: pull with a bounded retry, upload and download of
//!   single files
//! - [`RepositoryStore`]: which directory holds the clone of which remote
//! - [`GitSyncBackend`]: the [`SyncBackend`](core_sync::SyncBackend) the
//!   generic processor drives; prefers `LastRemoteModificationWins`
//! - [`GitFileSystemProvider`] / [`GitProviderFactory`]: the file-system
//!   surface registered with the resolver
//!
//! Writes land in the working tree and are reported as deferred until the
//! next sync pushes them.

pub mod client;
pub mod error;
pub mod processor;
pub mod provider;
pub mod repository;
pub mod store;

pub use client::{FileStatus, Git2Client, GitClient, PullStatus, Revision};
pub use error::{GitError, Result};
pub use processor::{GitAuthor, GitSyncBackend};
pub use provider::{GitFileSystemProvider, GitProviderFactory};
pub use repository::{GitRepository, PathTimestamps};
pub use store::{RepositoryStore, SettingsRepositoryStore};
