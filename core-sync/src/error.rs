use std::io;

use bridge_traits::BridgeError;
use core_auth::AuthError;
use thiserror::Error;

use crate::model::FsType;
use crate::status::SyncStatus;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File access denied: {0}")]
    FileAccess(String),

    #[error("Network error: {0}")]
    NetworkIo(String),

    #[error("I/O error: {0}")]
    GenericIo(String),

    #[error("Remote error: {0}")]
    RemoteApi(String),

    #[error("Database error: {0}")]
    Db(String),

    #[error("Local and remote changes to {uid} diverged; a resolution strategy is required")]
    NeedsResolution { uid: String },

    #[error("Sync already in progress for {uid}")]
    AlreadySyncing { uid: String },

    #[error("No conflict recorded for {uid} (status {status})")]
    NoConflict { uid: String, status: SyncStatus },

    #[error("No provider registered for file system type {0}")]
    ProviderNotRegistered(FsType),

    #[error("Sync timeout after {0} seconds")]
    Timeout(u64),
}

impl SyncError {
    /// Whether retrying the same operation later can succeed without user action
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::NetworkIo(_) | SyncError::Timeout(_) | SyncError::AlreadySyncing { .. }
        )
    }

    /// Sync status a failed operation leaves the file in
    pub fn status(&self) -> SyncStatus {
        match self {
            SyncError::Auth(_) => SyncStatus::AuthError,
            SyncError::FileNotFound(_) => SyncStatus::FileNotFound,
            SyncError::NeedsResolution { .. } => SyncStatus::Conflict,
            _ => SyncStatus::Error,
        }
    }
}

impl From<io::Error> for SyncError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => SyncError::FileNotFound(e.to_string()),
            io::ErrorKind::PermissionDenied => SyncError::FileAccess(e.to_string()),
            _ => SyncError::GenericIo(e.to_string()),
        }
    }
}

impl From<AuthError> for SyncError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::SecureStorageUnavailable(msg) => SyncError::Db(msg),
            other => SyncError::Auth(other.to_string()),
        }
    }
}

impl From<BridgeError> for SyncError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::Io(io) => io.into(),
            other => SyncError::Db(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
