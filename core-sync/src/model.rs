//! File identity model
//!
//! Value types shared by every backend: which backend instance a file lives
//! on ([`FsAuthority`]) and the file itself ([`FileDescriptor`]).

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use core_auth::Credentials;
use core_runtime::logging::redact_url_credentials;
use serde::{Deserialize, Serialize};

/// Closed set of storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsType {
    /// A directory on the local disk
    Local,
    /// A Git remote mirrored into a local working tree
    Git,
}

impl FsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FsType::Local => "local",
            FsType::Git => "git",
        }
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FsType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(FsType::Local),
            "git" => Ok(FsType::Git),
            other => Err(format!("unknown file system type '{}'", other)),
        }
    }
}

/// Identity of one backend instance
///
/// Equality and hashing use `fs_type` and `location` only. Two authorities that
/// differ only in credentials are the same backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsAuthority {
    pub fs_type: FsType,
    /// Remote URL for Git, root directory for local storage
    pub location: String,
    #[serde(skip)]
    pub credentials: Option<Credentials>,
    /// Whether the user may list and pick files on this backend
    pub is_browsable: bool,
}

impl FsAuthority {
    pub fn new(fs_type: FsType, location: impl Into<String>) -> Self {
        Self {
            fs_type,
            location: location.into(),
            credentials: None,
            is_browsable: true,
        }
    }

    pub fn local(root: impl Into<String>) -> Self {
        Self::new(FsType::Local, root)
    }

    pub fn git(remote_url: impl Into<String>) -> Self {
        Self::new(FsType::Git, remote_url)
    }

    /// Copy of this authority carrying `credentials`
    pub fn with_credentials(&self, credentials: Option<Credentials>) -> Self {
        Self {
            credentials,
            ..self.clone()
        }
    }

    pub fn with_browsable(mut self, is_browsable: bool) -> Self {
        self.is_browsable = is_browsable;
        self
    }

    pub fn key(&self) -> AuthorityKey {
        AuthorityKey {
            fs_type: self.fs_type,
            location: self.location.clone(),
        }
    }
}

impl PartialEq for FsAuthority {
    fn eq(&self, other: &Self) -> bool {
        self.fs_type == other.fs_type && self.location == other.location
    }
}

impl Eq for FsAuthority {}

impl Hash for FsAuthority {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fs_type.hash(state);
        self.location.hash(state);
    }
}

/// Log rendering; userinfo embedded in a remote URL is redacted
impl fmt::Display for FsAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.fs_type, redact_url_credentials(&self.location))
    }
}

/// Routing key derived from an [`FsAuthority`]
///
/// Rendered as `<type>:<location>`, e.g. `git:https://example.com/vault.git`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuthorityKey {
    pub fs_type: FsType,
    pub location: String,
}

impl AuthorityKey {
    /// Rendering for logs, with URL userinfo redacted
    pub fn redacted(&self) -> String {
        format!("{}:{}", self.fs_type, redact_url_credentials(&self.location))
    }
}

impl fmt::Display for AuthorityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.fs_type, self.location)
    }
}

impl FromStr for AuthorityKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (fs_type, location) = s
            .split_once(':')
            .ok_or_else(|| format!("authority key '{}' has no type prefix", s))?;
        Ok(Self {
            fs_type: fs_type.parse()?,
            location: location.to_string(),
        })
    }
}

/// A file or directory on some backend
///
/// `uid` is the backend-stable identifier and survives renames; `path` does
/// not. Descriptors are values: the `with_*` methods return new descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub fs_authority: FsAuthority,
    pub path: String,
    pub uid: String,
    pub name: String,
    pub is_directory: bool,
    pub is_root: bool,
    /// Last modification, epoch milliseconds
    pub modified: Option<i64>,
}

impl FileDescriptor {
    /// Describe a regular file; `name` is the last component of `path`
    pub fn new(fs_authority: FsAuthority, path: impl Into<String>, uid: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            name: file_name(&path).to_string(),
            fs_authority,
            path,
            uid: uid.into(),
            is_directory: false,
            is_root: false,
            modified: None,
        }
    }

    /// Describe the root directory of a backend
    pub fn root(fs_authority: FsAuthority, path: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            is_directory: true,
            is_root: true,
            ..Self::new(fs_authority, path, uid)
        }
    }

    pub fn with_directory(mut self, is_directory: bool) -> Self {
        self.is_directory = is_directory;
        self
    }

    pub fn with_modified(mut self, modified: Option<i64>) -> Self {
        self.modified = modified;
        self
    }

    pub fn with_authority(mut self, fs_authority: FsAuthority) -> Self {
        self.fs_authority = fs_authority;
        self
    }

    /// Same file (same uid) at a new path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self.name = file_name(&self.path).to_string();
        self
    }
}

fn file_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}
