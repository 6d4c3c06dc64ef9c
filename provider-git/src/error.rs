use bridge_traits::BridgeError;
use core_sync::SyncError;
use git2::{ErrorClass, ErrorCode};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GitError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Repository has no remote")]
    NoRemote,

    #[error("Repository has {0} remotes, expected exactly one")]
    MultipleRemotes(usize),

    #[error("Branch '{branch}' has no remote-tracking branch")]
    NoUpstream { branch: String },

    #[error("HEAD does not point to a branch")]
    DetachedHead,

    #[error("Pull failed: {0}")]
    PullFailed(String),

    #[error("Nothing to commit for {path}")]
    NothingToCommit { path: String },

    #[error("Push rejected for {reference}: {message}")]
    PushRejected { reference: String, message: String },

    #[error("Path '{0}' is not inside the working tree")]
    InvalidPath(String),

    #[error("Repository store error: {0}")]
    Store(#[from] BridgeError),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl GitError {
    /// Failure while talking to the remote
    pub fn is_network(&self) -> bool {
        match self {
            GitError::Git(e) => {
                e.code() != ErrorCode::Auth
                    && matches!(
                        e.class(),
                        ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssl | ErrorClass::Ssh
                    )
            }
            _ => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, GitError::Git(e) if e.code() == ErrorCode::Auth)
    }
}

impl From<GitError> for SyncError {
    fn from(e: GitError) -> Self {
        if e.is_auth() {
            return SyncError::Auth(e.to_string());
        }
        if e.is_network() {
            return SyncError::NetworkIo(e.to_string());
        }
        match e {
            GitError::Git(inner) if inner.class() == ErrorClass::Os => {
                SyncError::GenericIo(inner.message().to_string())
            }
            GitError::Io(io) => io.into(),
            GitError::Store(bridge) => bridge.into(),
            GitError::Task(msg) => SyncError::GenericIo(msg),
            other => SyncError::RemoteApi(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, GitError>;
