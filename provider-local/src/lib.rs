//! # Local Directory Provider
//!
//! Storage backend for databases kept in a directory on the local disk.
//!
//! There is no remote: the sync backend reports every existing file as
//! `NoChanges` and writes reach the disk immediately.

pub mod backend;
pub mod provider;

pub use backend::LocalSyncBackend;
pub use provider::{LocalFileSystemProvider, LocalProviderFactory};
