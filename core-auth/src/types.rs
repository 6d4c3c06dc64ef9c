//! Credential types

use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

/// Secret material a backend authenticates with
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credentials {
    /// HTTP basic style credentials (Git over HTTPS)
    UserPassword { username: String, password: String },
    /// Personal access token; sent as the password with a placeholder user
    Token { token: String },
}

impl Credentials {
    pub fn user_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::UserPassword {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn token(token: impl Into<String>) -> Self {
        Credentials::Token {
            token: token.into(),
        }
    }

    /// Reject credentials that cannot possibly authenticate
    pub fn validate(&self) -> Result<()> {
        match self {
            Credentials::UserPassword { username, .. } if username.trim().is_empty() => Err(
                AuthError::InvalidCredentials("username cannot be empty".to_string()),
            ),
            Credentials::Token { token } if token.trim().is_empty() => Err(
                AuthError::InvalidCredentials("token cannot be empty".to_string()),
            ),
            _ => Ok(()),
        }
    }

    /// Username to present, when the scheme has one
    pub fn username(&self) -> Option<&str> {
        match self {
            Credentials::UserPassword { username, .. } => Some(username),
            Credentials::Token { .. } => None,
        }
    }

    /// The secret half, regardless of scheme
    pub fn secret(&self) -> &str {
        match self {
            Credentials::UserPassword { password, .. } => password,
            Credentials::Token { token } => token,
        }
    }
}

// Custom Debug implementation to avoid logging secrets
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::UserPassword { username, .. } => f
                .debug_struct("UserPassword")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Credentials::Token { .. } => f
                .debug_struct("Token")
                .field("token", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Shared, mutable credential slot
///
/// Readers get a clone; the lock is never held across I/O.
#[derive(Default)]
pub struct CredentialCell {
    inner: RwLock<Option<Credentials>>,
}

impl CredentialCell {
    pub fn new(initial: Option<Credentials>) -> Self {
        Self {
            inner: RwLock::new(initial),
        }
    }

    pub fn get(&self) -> Option<Credentials> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the stored credentials, returning the previous value
    pub fn set(&self, credentials: Option<Credentials>) -> Option<Credentials> {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, credentials)
    }

    pub fn is_set(&self) -> bool {
        self.get().is_some()
    }
}

impl fmt::Debug for CredentialCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCell")
            .field("is_set", &self.is_set())
            .finish()
    }
}
