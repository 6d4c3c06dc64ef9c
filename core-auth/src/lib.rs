//! # Authentication Module
//!
//! Credential handling for storage backends.
//!
//! ## Overview
//!
//! - [`Credentials`]: what a backend needs to authenticate (username/password
//!   or a bearer token). `Debug` never prints secrets.
//! - [`CredentialCell`]: the one mutable credential slot of an authenticator.
//!   Authorities stay immutable; after an interactive login only the cell
//!   changes.
//! - [`CredentialStore`]: persists credentials per authority in a
//!   [`SecureStore`](bridge_traits::SecureStore).

pub mod error;
pub mod store;
pub mod types;

pub use error::{AuthError, Result};
pub use store::CredentialStore;
pub use types::{CredentialCell, Credentials};
