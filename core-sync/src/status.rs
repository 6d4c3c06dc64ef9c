//! Sync status types

use std::fmt;

use core_runtime::events::SyncProgressStatus;
use serde::{Deserialize, Serialize};

use crate::model::FileDescriptor;

/// Last known relationship between the local copy and the remote for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    NoChanges,
    LocalChanges,
    RemoteChanges,
    Conflict,
    Error,
    AuthError,
    FileNotFound,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::NoChanges => "no_changes",
            SyncStatus::LocalChanges => "local_changes",
            SyncStatus::RemoteChanges => "remote_changes",
            SyncStatus::Conflict => "conflict",
            SyncStatus::Error => "error",
            SyncStatus::AuthError => "auth_error",
            SyncStatus::FileNotFound => "file_not_found",
        }
    }

    /// Whether a `process()` call has work to do
    pub fn needs_sync(&self) -> bool {
        matches!(
            self,
            SyncStatus::LocalChanges | SyncStatus::RemoteChanges | SyncStatus::Conflict
        )
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated state published to observers of an open database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub status: SyncStatus,
    pub progress: SyncProgressStatus,
    /// Backend-opaque token for the remote state materialized locally
    pub revision: Option<String>,
}

/// Verdict of the [`SyncStrategyResolver`](crate::strategy::SyncStrategyResolver)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncResolution {
    /// Local copy wins; upload it
    Local,
    /// Remote copy wins; download it
    Remote,
    /// Nothing to do
    Equal,
    /// Divergent edits; the caller has to pick a side
    Error,
}

/// How timestamps are compared when deciding a direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SyncStrategy {
    /// Newest side wins
    #[default]
    LastModificationWins,
    /// Newest side wins unless the remote moved since the local edit's base
    LastRemoteModificationWins,
}

/// Caller's choice after a reconciliation reported divergent edits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictResolutionStrategy {
    ResolveWithLocalFile,
    ResolveWithRemoteFile,
}

/// Both sides of a divergent file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConflict {
    pub local: FileDescriptor,
    pub remote: FileDescriptor,
}

impl SyncConflict {
    pub fn local_modified(&self) -> Option<i64> {
        self.local.modified
    }

    pub fn remote_modified(&self) -> Option<i64> {
        self.remote.modified
    }
}

/// Where a successful write landed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WriteOutcome {
    /// The backing store has the new bytes
    Immediate,
    /// The bytes are stored locally and wait for the next sync
    Deferred,
}

impl WriteOutcome {
    pub fn is_deferred(&self) -> bool {
        matches!(self, WriteOutcome::Deferred)
    }
}
