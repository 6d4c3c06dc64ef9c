//! Backend-relative path helpers
//!
//! Paths handed to providers are relative to the backend root and use `/`
//! as separator. The root itself is the empty string.

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use core_sync::{Result, SyncError};

/// Canonical form of `path`: no leading or trailing `/`, no empty, `.` or
/// `..` segments
pub fn normalize(path: &str) -> Result<String> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    if trimmed
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(SyncError::FileAccess(format!(
            "path '{}' escapes the backend root",
            path
        )));
    }
    Ok(trimmed.to_string())
}

/// Absolute location of a normalized `path` below `root`
pub fn resolve(root: &Path, path: &str) -> PathBuf {
    if path.is_empty() {
        root.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Parent of a normalized, non-root `path`; `""` for top-level entries
pub fn parent(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

/// Child `name` of the normalized directory `dir`
pub fn child(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Modification time in epoch milliseconds
pub fn modified_millis(metadata: &Metadata) -> Option<i64> {
    let modified = metadata.modified().ok()?;
    let elapsed = modified.duration_since(UNIX_EPOCH).ok()?;
    i64::try_from(elapsed.as_millis()).ok()
}
