//! # Core Configuration
//!
//! Runtime configuration for the sync core, assembled with a builder and
//! validated once at startup.
//!
//! ## Required Dependencies
//!
//! - `storage_dir`: root under which backend working copies live (Git clones
//!   go to `<storage_dir>/git/<uuid>`)
//! - `SettingsStore`: persists the `remote -> working copy` rows
//!
//! ## Optional Dependencies
//!
//! - `SecureStore`: when present, credentials applied through sign-in are
//!   persisted and restored on the next start
//!
//! ## Example
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .storage_dir("/var/lib/vault-sync")
//!     .settings_store(Arc::new(settings))
//!     .secure_store(Arc::new(KeyringSecureStore::new()))
//!     .sync_timeout(Duration::from_secs(60))
//!     .build()?;
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bridge_traits::{SecureStore, SettingsStore};

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;

/// Default caller-side timeout around one reconciliation
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(120);

/// Commit author used when the repository config has no `user.name`
pub const DEFAULT_GIT_AUTHOR_NAME: &str = "Vault Sync";

/// Commit e-mail used when the repository config has no `user.email`
pub const DEFAULT_GIT_AUTHOR_EMAIL: &str = "vault-sync@localhost";

/// Upper bound on the sync timeout
const MAX_SYNC_TIMEOUT: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
pub struct CoreConfig {
    /// Root directory for backend-owned data
    pub storage_dir: PathBuf,

    pub settings_store: Arc<dyn SettingsStore>,

    pub secure_store: Option<Arc<dyn SecureStore>>,

    /// Per-subscriber buffer of the event bus
    pub event_buffer_size: usize,

    /// Timeout applied around `process()` by the service facade
    pub sync_timeout: Duration,

    pub git_author_name: String,

    pub git_author_email: String,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("storage_dir", &self.storage_dir)
            .field("settings_store", &"SettingsStore { ... }")
            .field(
                "secure_store",
                &self.secure_store.as_ref().map(|_| "SecureStore { ... }"),
            )
            .field("event_buffer_size", &self.event_buffer_size)
            .field("sync_timeout", &self.sync_timeout)
            .field("git_author_name", &self.git_author_name)
            .field("git_author_email", &self.git_author_email)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Directory that holds one subdirectory per cloned Git remote
    pub fn git_dir(&self) -> PathBuf {
        self.storage_dir.join("git")
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage_dir.as_os_str().is_empty() {
            return Err(Error::Config("Storage directory cannot be empty".to_string()));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.sync_timeout.is_zero() {
            return Err(Error::Config(
                "Sync timeout must be greater than 0".to_string(),
            ));
        }

        if self.sync_timeout > MAX_SYNC_TIMEOUT {
            return Err(Error::Config(
                "Sync timeout exceeds maximum of one hour".to_string(),
            ));
        }

        if self.git_author_name.trim().is_empty() {
            return Err(Error::Config("Git author name cannot be empty".to_string()));
        }

        if !self.git_author_email.contains('@') {
            return Err(Error::Config(format!(
                "Git author email '{}' is not an e-mail address",
                self.git_author_email
            )));
        }

        Ok(())
    }
}

#[derive(Default)]
pub struct CoreConfigBuilder {
    storage_dir: Option<PathBuf>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    secure_store: Option<Arc<dyn SecureStore>>,
    event_buffer_size: Option<usize>,
    sync_timeout: Option<Duration>,
    git_author_name: Option<String>,
    git_author_email: Option<String>,
}

impl CoreConfigBuilder {
    pub fn storage_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.storage_dir = Some(path.into());
        self
    }

    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = Some(timeout);
        self
    }

    pub fn git_author(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.git_author_name = Some(name.into());
        self.git_author_email = Some(email.into());
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when `storage_dir` is missing or a value is out of range
    /// - [`Error::CapabilityMissing`] when no `SettingsStore` was injected
    pub fn build(self) -> Result<CoreConfig> {
        let storage_dir = self.storage_dir.ok_or_else(|| {
            Error::Config("Storage directory is required (call .storage_dir())".to_string())
        })?;

        let settings_store = self.settings_store.ok_or_else(|| Error::CapabilityMissing {
            capability: "SettingsStore".to_string(),
            message: "A SettingsStore is required to remember where each Git remote is cloned. \
                      Desktop: use bridge_desktop::SqliteSettingsStore. \
                      Mobile: inject a SharedPreferences/UserDefaults adapter."
                .to_string(),
        })?;

        let config = CoreConfig {
            storage_dir,
            settings_store,
            secure_store: self.secure_store,
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            sync_timeout: self.sync_timeout.unwrap_or(DEFAULT_SYNC_TIMEOUT),
            git_author_name: self
                .git_author_name
                .unwrap_or_else(|| DEFAULT_GIT_AUTHOR_NAME.to_string()),
            git_author_email: self
                .git_author_email
                .unwrap_or_else(|| DEFAULT_GIT_AUTHOR_EMAIL.to_string()),
        };

        config.validate()?;
        Ok(config)
    }
}
