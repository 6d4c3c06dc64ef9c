//! # Sync Service
//!
//! Entry point for host applications. Builds the event bus, the provider
//! resolver with a factory for every enabled backend, the commit path and the
//! state observer from one [`CoreConfig`].
//!
//! ```ignore
//! let service = SyncService::desktop("/var/lib/vault-sync").await?;
//! let provider = service.provider(&FsAuthority::git(url)).await?;
//! let file = provider.get_file("vault.kdbx").await?;
//!
//! let bytes = service.open_database(&file).await?;
//! service.save_database(&file, edited).await?;
//! service.synchronize(&file, None).await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use core_auth::{CredentialStore, Credentials};
use core_fs::{FileSystemProvider, FileSystemResolver};
use core_runtime::config::CoreConfig;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
use core_sync::{
    ConflictResolutionStrategy, FileDescriptor, FsAuthority, SyncConflict, SyncError,
    SyncStatus, WriteOutcome,
};
use tracing::{debug, info, instrument, warn};

use crate::committer::DatabaseCommitter;
use crate::error::{CoreError, Result};
use crate::state::DatabaseSyncStateProvider;

pub struct SyncService {
    config: CoreConfig,
    event_bus: EventBus,
    resolver: Arc<FileSystemResolver>,
    credentials: Option<CredentialStore>,
    committer: DatabaseCommitter,
    state: DatabaseSyncStateProvider,
}

impl SyncService {
    /// Wire the service; must be called inside a tokio runtime
    ///
    /// # Errors
    ///
    /// [`CoreError::InitializationFailed`] when the crate was built without
    /// any backend feature.
    pub fn new(config: CoreConfig) -> Result<Self> {
        let event_bus = EventBus::new(config.event_buffer_size);
        let resolver = Arc::new(build_resolver(&config, &event_bus));
        if resolver.registered_types().is_empty() {
            return Err(CoreError::InitializationFailed(
                "No storage backend enabled; build with the `git` or `local` feature".to_string(),
            ));
        }

        let credentials = config.secure_store.clone().map(CredentialStore::new);
        if credentials.is_none() {
            debug!("No secure store configured, credentials last for the session only");
        }

        info!(backends = ?resolver.registered_types(), "Sync service ready");
        Ok(Self {
            committer: DatabaseCommitter::new(event_bus.clone()),
            state: DatabaseSyncStateProvider::new(Arc::clone(&resolver), &event_bus),
            config,
            event_bus,
            resolver,
            credentials,
        })
    }

    /// Service keeping its settings in `<storage_dir>/settings.db` and
    /// credentials in the OS keychain
    #[cfg(feature = "desktop-shims")]
    pub async fn desktop(storage_dir: impl Into<std::path::PathBuf>) -> Result<Self> {
        use bridge_desktop::{KeyringSecureStore, SqliteSettingsStore};

        let storage_dir = storage_dir.into();
        let settings = SqliteSettingsStore::new(storage_dir.join("settings.db")).await?;
        let config = CoreConfig::builder()
            .storage_dir(storage_dir)
            .settings_store(Arc::new(settings))
            .secure_store(Arc::new(KeyringSecureStore::new()))
            .build()?;
        Self::new(config)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn resolver(&self) -> Arc<FileSystemResolver> {
        Arc::clone(&self.resolver)
    }

    pub fn committer(&self) -> &DatabaseCommitter {
        &self.committer
    }

    pub fn state_provider(&self) -> &DatabaseSyncStateProvider {
        &self.state
    }

    /// Provider serving `authority`
    ///
    /// A provider without credentials picks up the ones stored for its
    /// authority by an earlier sign-in.
    pub async fn provider(&self, authority: &FsAuthority) -> Result<Arc<dyn FileSystemProvider>> {
        let provider = self.resolver.resolve_provider(authority).await?;
        let authenticator = provider.authenticator();
        if authority.credentials.is_none() && authenticator.credentials().is_none() {
            if let Some(store) = &self.credentials {
                if let Some(stored) = store.load(&authority.key().to_string()).await? {
                    debug!(authority = %authority, "Restored stored credentials");
                    authenticator.set_credentials(Some(stored));
                }
            }
        }
        Ok(provider)
    }

    /// Apply `credentials` to `authority` and remember them when a secure
    /// store is configured
    #[instrument(skip(self, authority, credentials), fields(authority = %authority))]
    pub async fn sign_in(&self, authority: &FsAuthority, credentials: Credentials) -> Result<()> {
        credentials.validate()?;
        let key = authority.key().to_string();
        if let Some(store) = &self.credentials {
            store.store(&key, &credentials).await?;
        }

        self.resolver
            .resolve_provider(&authority.with_credentials(Some(credentials)))
            .await?;
        let _ = self
            .event_bus
            .emit(CoreEvent::Auth(AuthEvent::CredentialsUpdated { authority: key }));
        info!("Signed in");
        Ok(())
    }

    /// Forget the credentials of `authority`
    #[instrument(skip(self, authority), fields(authority = %authority))]
    pub async fn sign_out(&self, authority: &FsAuthority) -> Result<()> {
        let key = authority.key().to_string();
        if let Some(store) = &self.credentials {
            store.remove(&key).await?;
        }
        let provider = self.resolver.resolve_provider(authority).await?;
        provider.authenticator().set_credentials(None);
        let _ = self
            .event_bus
            .emit(CoreEvent::Auth(AuthEvent::CredentialsUpdated { authority: key }));
        Ok(())
    }

    /// Read `file` and start tracking its sync state
    pub async fn open_database(&self, file: &FileDescriptor) -> Result<Bytes> {
        let provider = self.provider(&file.fs_authority).await?;
        let data = provider.open_file_for_read(file).await?;
        self.state.database_opened(file).await?;
        Ok(data)
    }

    pub fn close_database(&self) {
        self.state.database_closed();
    }

    /// Write `data` through the commit lock
    pub async fn save_database(&self, file: &FileDescriptor, data: Bytes) -> Result<WriteOutcome> {
        let provider = self.provider(&file.fs_authority).await?;
        Ok(self.committer.commit(provider.as_ref(), file, data).await?)
    }

    pub async fn sync_status(&self, file: &FileDescriptor) -> Result<SyncStatus> {
        let provider = self.provider(&file.fs_authority).await?;
        Ok(provider.sync_processor().sync_status_for_file(&file.uid).await)
    }

    pub async fn sync_conflict(&self, file: &FileDescriptor) -> Result<SyncConflict> {
        let provider = self.provider(&file.fs_authority).await?;
        Ok(provider
            .sync_processor()
            .sync_conflict_for_file(&file.uid)
            .await?)
    }

    /// Reconcile `file` with the backend's preferred strategy
    ///
    /// # Errors
    ///
    /// - [`SyncError::Timeout`] after `config.sync_timeout`
    /// - [`SyncError::NeedsResolution`] on divergent edits without `resolution`
    #[instrument(skip(self, file), fields(uid = %file.uid))]
    pub async fn synchronize(
        &self,
        file: &FileDescriptor,
        resolution: Option<ConflictResolutionStrategy>,
    ) -> Result<FileDescriptor> {
        let provider = self.provider(&file.fs_authority).await?;
        let processor = provider.sync_processor();
        let strategy = processor.preferred_strategy();

        let result = with_timeout(
            self.config.sync_timeout,
            self.committer
                .synchronize(processor.as_ref(), file, Some(strategy), resolution),
        )
        .await;

        if let Err(SyncError::Auth(message)) = &result {
            warn!(error = %message, "Backend rejected credentials");
            let _ = self
                .event_bus
                .emit(CoreEvent::Auth(AuthEvent::AuthenticationRequired {
                    authority: file.fs_authority.key().to_string(),
                    message: message.clone(),
                }));
        }
        Ok(result?)
    }
}

#[allow(unused_mut, unused_variables)]
fn build_resolver(config: &CoreConfig, event_bus: &EventBus) -> FileSystemResolver {
    let mut resolver = FileSystemResolver::new();

    #[cfg(feature = "git")]
    resolver.register(
        core_sync::FsType::Git,
        Arc::new(provider_git::GitProviderFactory::from_config(
            config,
            event_bus.clone(),
        )),
    );

    #[cfg(feature = "local")]
    resolver.register(
        core_sync::FsType::Local,
        Arc::new(provider_local::LocalProviderFactory::new(event_bus.clone())),
    );

    resolver
}

async fn with_timeout<T>(
    limit: Duration,
    operation: impl Future<Output = core_sync::Result<T>>,
) -> core_sync::Result<T> {
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout(limit.as_secs())),
    }
}
