//! Backend authentication state
//!
//! An [`FsAuthority`] is an immutable value. The credentials a backend
//! currently authenticates with live next to it in an [`Authenticator`], so
//! an interactive sign-in swaps the credentials without changing which
//! backend instance a file routes to.

use core_auth::{CredentialCell, Credentials};
use core_sync::{FsAuthority, FsType};
use tracing::debug;

/// Credential holder of one backend instance
pub trait Authenticator: Send + Sync {
    /// The authority with the current credentials embedded
    fn fs_authority(&self) -> FsAuthority;

    /// Replace the credentials, e.g. after an interactive login
    fn set_credentials(&self, credentials: Option<Credentials>);

    fn credentials(&self) -> Option<Credentials>;

    /// Whether the backend cannot be reached without credentials the
    /// authenticator does not hold yet
    fn is_authentication_required(&self) -> bool;
}

/// [`Authenticator`] backed by a [`CredentialCell`]
#[derive(Debug)]
pub struct CredentialAuthenticator {
    authority: FsAuthority,
    cell: CredentialCell,
}

impl CredentialAuthenticator {
    /// Take `authority`'s embedded credentials as the initial value
    pub fn new(authority: &FsAuthority) -> Self {
        Self {
            cell: CredentialCell::new(authority.credentials.clone()),
            authority: authority.with_credentials(None),
        }
    }

    fn needs_credentials(&self) -> bool {
        match self.authority.fs_type {
            FsType::Local => false,
            FsType::Git => {
                let location = self.authority.location.to_ascii_lowercase();
                location.starts_with("https://") || location.starts_with("http://")
            }
        }
    }
}

impl Authenticator for CredentialAuthenticator {
    fn fs_authority(&self) -> FsAuthority {
        self.authority.with_credentials(self.cell.get())
    }

    fn set_credentials(&self, credentials: Option<Credentials>) {
        let had_previous = self.cell.set(credentials).is_some();
        debug!(
            authority = %self.authority,
            replaced = had_previous,
            "Credentials updated"
        );
    }

    fn credentials(&self) -> Option<Credentials> {
        self.cell.get()
    }

    fn is_authentication_required(&self) -> bool {
        self.needs_credentials() && !self.cell.is_set()
    }
}
