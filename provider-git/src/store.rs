//! Working-copy locations
//!
//! Remembers which directory holds the clone of each Git remote, so a
//! restart reopens the existing working tree instead of cloning again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bridge_traits::storage::SettingsStore;
use core_runtime::logging::redact_url_credentials;
use core_sync::AuthorityKey;
use tracing::{debug, warn};

use crate::error::Result;

const KEY_PREFIX: &str = "git.repository.";

#[async_trait]
pub trait RepositoryStore: Send + Sync {
    async fn get(&self, authority: &AuthorityKey) -> Result<Option<PathBuf>>;

    async fn put(&self, authority: &AuthorityKey, path: &Path) -> Result<()>;

    async fn remove(&self, authority: &AuthorityKey) -> Result<()>;

    /// Every remembered working copy
    async fn list(&self) -> Result<Vec<(AuthorityKey, PathBuf)>>;
}

/// [`RepositoryStore`] keeping one `git.repository.<authority>` row per
/// remote in a [`SettingsStore`]
#[derive(Clone)]
pub struct SettingsRepositoryStore {
    settings: Arc<dyn SettingsStore>,
}

impl SettingsRepositoryStore {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self { settings }
    }
}

fn settings_key(authority: &AuthorityKey) -> String {
    format!("{}{}", KEY_PREFIX, authority)
}

#[async_trait]
impl RepositoryStore for SettingsRepositoryStore {
    async fn get(&self, authority: &AuthorityKey) -> Result<Option<PathBuf>> {
        let value = self.settings.get_string(&settings_key(authority)).await?;
        Ok(value.map(PathBuf::from))
    }

    async fn put(&self, authority: &AuthorityKey, path: &Path) -> Result<()> {
        self.settings
            .set_string(&settings_key(authority), &path.to_string_lossy())
            .await?;
        debug!(
            remote = %redact_url_credentials(&authority.location),
            path = %path.display(),
            "Remembered working copy"
        );
        Ok(())
    }

    async fn remove(&self, authority: &AuthorityKey) -> Result<()> {
        self.settings.delete(&settings_key(authority)).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(AuthorityKey, PathBuf)>> {
        let keys = self.settings.list_keys_with_prefix(KEY_PREFIX).await?;
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(raw) = key.strip_prefix(KEY_PREFIX) else {
                continue;
            };
            let authority = match raw.parse::<AuthorityKey>() {
                Ok(authority) => authority,
                Err(e) => {
                    warn!(key = %redact_url_credentials(&key), error = %e, "Skipping unreadable working copy entry");
                    continue;
                }
            };
            if let Some(path) = self.settings.get_string(&key).await? {
                entries.push((authority, PathBuf::from(path)));
            }
        }
        entries.sort();
        Ok(entries)
    }
}
