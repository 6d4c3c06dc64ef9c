//! Process-local secret storage for hosts without a keychain

use std::collections::HashMap;

use async_trait::async_trait;
use bridge_traits::{error::Result, storage::SecureStore};
use tokio::sync::Mutex;

/// Secure store that keeps secrets in memory only
///
/// Used when the `secure-store` feature is off or the platform keychain is
/// unreachable. Secrets vanish with the process.
#[derive(Default)]
pub struct MemorySecureStore {
    secrets: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySecureStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecureStore for MemorySecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        self.secrets
            .lock()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.secrets.lock().await.get(key).cloned())
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        self.secrets.lock().await.remove(key);
        Ok(())
    }
}
