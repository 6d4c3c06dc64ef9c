//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! - [`SqliteSettingsStore`] - `SettingsStore` on a SQLite table
//! - [`KeyringSecureStore`] - `SecureStore` on the OS keychain (`secure-store` feature)
//! - [`MemorySecureStore`] - `SecureStore` fallback that never touches disk
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{KeyringSecureStore, SqliteSettingsStore};
//!
//! let settings = SqliteSettingsStore::new(data_dir.join("settings.db")).await?;
//! let secrets = KeyringSecureStore::new();
//! ```

mod memory_store;
mod settings;

#[cfg(feature = "secure-store")]
mod secure_store;

pub use memory_store::MemorySecureStore;
pub use settings::SqliteSettingsStore;

#[cfg(feature = "secure-store")]
pub use secure_store::{KeyringSecureStore, DEFAULT_SERVICE_NAME};
