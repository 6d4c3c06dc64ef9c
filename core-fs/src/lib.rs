//! # File System Layer
//!
//! Backend-independent file access for the vault.
//!
//! - [`Authenticator`]: the credentials one backend instance currently uses
//! - [`FileSystemProvider`]: uniform file operations plus the backend's
//!   [`SyncProcessor`](core_sync::SyncProcessor)
//! - [`FileSystemResolver`]: routes an authority to its provider instance
//! - [`path`]: helpers for backend-relative paths

pub mod authenticator;
pub mod path;
pub mod provider;
pub mod resolver;

pub use authenticator::{Authenticator, CredentialAuthenticator};
pub use provider::{FileSystemProvider, ProviderFactory};
pub use resolver::FileSystemResolver;
