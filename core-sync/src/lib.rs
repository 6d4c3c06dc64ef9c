//! # Sync Module
//!
//! Decides and drives the reconciliation of single files between a local
//! copy and a remote backend.
//!
//! ## Components
//!
//! - **Model** (`model`): [`FsAuthority`], [`AuthorityKey`], [`FileDescriptor`]
//! - **Status types** (`status`): [`SyncStatus`], [`SyncState`], strategies and verdicts
//! - **Strategy resolver** (`strategy`): pure timestamp comparison
//! - **Processor** (`processor`): the [`SyncProcessor`] contract and the
//!   generic [`BackendSyncProcessor`] with progress tracking and per-file guard
//!
//! [`SyncProgressStatus`] is defined next to the event bus in `core-runtime`
//! and re-exported here.

pub mod error;
pub mod model;
pub mod processor;
pub mod progress;
pub mod status;
pub mod strategy;

pub use core_runtime::events::SyncProgressStatus;
pub use error::{Result, SyncError};
pub use model::{AuthorityKey, FileDescriptor, FsAuthority, FsType};
pub use processor::{BackendSyncProcessor, SyncBackend, SyncProcessor, SyncTimestamps};
pub use progress::ProgressTracker;
pub use status::{
    ConflictResolutionStrategy, SyncConflict, SyncResolution, SyncState, SyncStatus,
    SyncStrategy, WriteOutcome,
};
pub use strategy::SyncStrategyResolver;
