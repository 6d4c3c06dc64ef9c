//! Core service façade.
//!
//! Wires the storage backends, the commit path and the sync state observer
//! together behind [`SyncService`]. Backends are compiled in through the
//! `git` and `local` features; `desktop-shims` adds the
//! [`SyncService::desktop`] constructor backed by SQLite settings and the OS
//! keychain.

pub mod committer;
pub mod error;
pub mod service;
pub mod state;

#[cfg(test)]
mod testing;

pub use committer::DatabaseCommitter;
pub use error::{CoreError, Result};
pub use service::SyncService;
pub use state::DatabaseSyncStateProvider;
