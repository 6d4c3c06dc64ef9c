//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the vault sync core:
//! - Logging and tracing bootstrap
//! - Configuration management
//! - Typed event bus
//!
//! Every other core crate depends on this one for its event topics and, in
//! the service facade, for its configuration.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
