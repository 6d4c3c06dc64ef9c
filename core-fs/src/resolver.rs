//! # File System Resolver
//!
//! Routes an [`FsAuthority`] to the one provider instance serving it.
//!
//! Providers are created lazily by the [`ProviderFactory`] registered for the
//! authority's [`FsType`] and kept for the resolver's lifetime. Routing uses
//! [`AuthorityKey`], so two authorities that differ only in their embedded
//! credentials reach the same instance; the incoming credentials are handed
//! to that instance's authenticator.

use std::collections::HashMap;
use std::sync::Arc;

use core_sync::{AuthorityKey, FsAuthority, FsType, Result, SyncError, SyncProcessor};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::provider::{FileSystemProvider, ProviderFactory};

#[derive(Default)]
pub struct FileSystemResolver {
    factories: HashMap<FsType, Arc<dyn ProviderFactory>>,
    providers: RwLock<HashMap<AuthorityKey, Arc<dyn FileSystemProvider>>>,
}

impl FileSystemResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory for `fs_type`, replacing any previous one
    ///
    /// Providers already created by the previous factory stay cached.
    pub fn register(&mut self, fs_type: FsType, factory: Arc<dyn ProviderFactory>) {
        self.factories.insert(fs_type, factory);
        info!("Registered file system provider factory: {}", fs_type);
    }

    pub fn registered_types(&self) -> Vec<FsType> {
        let mut types: Vec<_> = self.factories.keys().copied().collect();
        types.sort();
        types
    }

    /// Provider serving `authority`, created on first use
    ///
    /// # Errors
    ///
    /// - [`SyncError::ProviderNotRegistered`] when no factory handles the type
    /// - whatever the factory reports while creating the provider
    #[instrument(skip(self, authority), fields(authority = %authority))]
    pub async fn resolve_provider(
        &self,
        authority: &FsAuthority,
    ) -> Result<Arc<dyn FileSystemProvider>> {
        let key = authority.key();

        let existing = self.providers.read().await.get(&key).cloned();
        if let Some(provider) = existing {
            apply_credentials(provider.as_ref(), authority);
            return Ok(provider);
        }

        let factory = self
            .factories
            .get(&authority.fs_type)
            .cloned()
            .ok_or(SyncError::ProviderNotRegistered(authority.fs_type))?;

        // Held across creation so concurrent callers end up with one instance.
        let mut providers = self.providers.write().await;
        if let Some(provider) = providers.get(&key) {
            apply_credentials(provider.as_ref(), authority);
            return Ok(Arc::clone(provider));
        }

        let provider = factory.create(authority).await?;
        providers.insert(key, Arc::clone(&provider));
        debug!("Created file system provider");
        Ok(provider)
    }

    /// Sync processor of the provider serving `authority`
    pub async fn resolve_sync_processor(
        &self,
        authority: &FsAuthority,
    ) -> Result<Arc<dyn SyncProcessor>> {
        Ok(self.resolve_provider(authority).await?.sync_processor())
    }

    /// Keys of every provider created so far
    pub async fn cached_providers(&self) -> Vec<AuthorityKey> {
        let mut keys: Vec<_> = self.providers.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Drop the cached provider for `authority`; the next resolve creates a
    /// fresh one
    pub async fn evict(&self, authority: &FsAuthority) -> bool {
        let removed = self.providers.write().await.remove(&authority.key()).is_some();
        if removed {
            info!(authority = %authority, "Evicted file system provider");
        }
        removed
    }
}

fn apply_credentials(provider: &dyn FileSystemProvider, authority: &FsAuthority) {
    if authority.credentials.is_some() {
        provider
            .authenticator()
            .set_credentials(authority.credentials.clone());
    }
}
