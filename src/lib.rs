//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (e.g., `core-service` and its `git` and `local` backends).
//! Host applications can depend on `vault-sync-workspace` and enable the
//! documented features without needing to wire each crate individually.

#[cfg(any(feature = "desktop-shims", feature = "git", feature = "local"))]
pub use core_service::*;
