//! Secure Credential Storage
//!
//! Persists backend credentials through the host's [`SecureStore`]
//! (Keychain, Keystore, libsecret).
//!
//! Entries are keyed `credentials:<authority key>` and stored as JSON.
//! Secrets never appear in logs or error messages.
//!
//! ## Example
//!
//! ```no_run
//! use core_auth::{CredentialStore, Credentials};
//! use std::sync::Arc;
//! # use bridge_traits::storage::SecureStore;
//! # async fn example(secure_store: Arc<dyn SecureStore>) -> core_auth::Result<()> {
//! let store = CredentialStore::new(secure_store);
//! let key = "git:https://example.com/team/vault.git";
//!
//! store.store(key, &Credentials::user_password("alice", "s3cret")).await?;
//! let restored = store.load(key).await?;
//! store.remove(key).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use bridge_traits::storage::SecureStore;
use tracing::{debug, info, warn};

use crate::error::{AuthError, Result};
use crate::types::Credentials;

const KEY_PREFIX: &str = "credentials:";

#[derive(Clone)]
pub struct CredentialStore {
    secure_store: Arc<dyn SecureStore>,
}

impl CredentialStore {
    pub fn new(secure_store: Arc<dyn SecureStore>) -> Self {
        Self { secure_store }
    }

    /// Persist `credentials` for the authority identified by `authority_key`
    pub async fn store(&self, authority_key: &str, credentials: &Credentials) -> Result<()> {
        credentials.validate()?;

        let json = serde_json::to_vec(credentials).map_err(|e| AuthError::Serialization {
            context: "serialize credentials".to_string(),
            source: e,
        })?;

        self.secure_store
            .set_secret(&storage_key(authority_key), &json)
            .await
            .map_err(|e| {
                warn!(authority = authority_key, error = %e, "Failed to store credentials");
                AuthError::SecureStorageUnavailable(e.to_string())
            })?;

        info!(authority = authority_key, "Credentials stored");
        Ok(())
    }

    /// Load the credentials for `authority_key`
    ///
    /// A corrupted entry is deleted and reported as absent so the user is
    /// asked to sign in again.
    pub async fn load(&self, authority_key: &str) -> Result<Option<Credentials>> {
        let key = storage_key(authority_key);
        let data = self.secure_store.get_secret(&key).await.map_err(|e| {
            warn!(authority = authority_key, error = %e, "Failed to read credentials");
            AuthError::SecureStorageUnavailable(e.to_string())
        })?;

        let Some(data) = data else {
            debug!(authority = authority_key, "No stored credentials");
            return Ok(None);
        };

        match serde_json::from_slice::<Credentials>(&data) {
            Ok(credentials) => Ok(Some(credentials)),
            Err(e) => {
                warn!(
                    authority = authority_key,
                    error = %e,
                    "Stored credentials are corrupted, discarding"
                );
                if let Err(e) = self.secure_store.delete_secret(&key).await {
                    warn!(authority = authority_key, error = %e, "Failed to discard credentials");
                }
                Ok(None)
            }
        }
    }

    pub async fn remove(&self, authority_key: &str) -> Result<()> {
        self.secure_store
            .delete_secret(&storage_key(authority_key))
            .await
            .map_err(|e| AuthError::SecureStorageUnavailable(e.to_string()))?;

        info!(authority = authority_key, "Credentials removed");
        Ok(())
    }
}

fn storage_key(authority_key: &str) -> String {
    format!("{}{}", KEY_PREFIX, authority_key)
}
