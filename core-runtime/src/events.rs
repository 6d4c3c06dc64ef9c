//! # Event Bus System
//!
//! Typed publish/subscribe channel between the sync core and its observers,
//! built on `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: one enum per topic, wrapped by [`CoreEvent`]
//! - **EventBus**: cloneable handle to the broadcast channel
//!
//! The bus is constructed explicitly and handed to every publisher and
//! subscriber. There is no global instance.
//!
//! ```text
//! ┌──────────────────┐  ProgressChanged  ┌───────────┐
//! │ SyncProcessor    ├──────────────────>│           │     subscribe    ┌──────────────────────────┐
//! └──────────────────┘                   │ EventBus  ├─────────────────>│ DatabaseSyncStateProvider│
//! ┌──────────────────┐  Committed        │           │                  └──────────────────────────┘
//! │ DatabaseCommitter├──────────────────>│           │
//! └──────────────────┘                   └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent, SyncProgressStatus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut stream = bus.subscribe();
//!
//! bus.emit(CoreEvent::Sync(SyncEvent::ProgressChanged {
//!     authority: "git:file:///srv/vault.git".to_string(),
//!     uid: "vault.kdbx".to_string(),
//!     progress: SyncProgressStatus::Syncing,
//! }))
//! .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert!(matches!(event, CoreEvent::Sync(_)));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events. Non-fatal;
//!   observers that cache state should re-query it.
//! - **`RecvError::Closed`**: every sender was dropped; treat as shutdown.
//!
//! `emit` fails only when nobody is subscribed. Publishers ignore that case.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Per-file reconciliation progress
    Sync(SyncEvent),
    /// Database commit completed
    Database(DatabaseEvent),
    /// Credential changes for a backend
    Auth(AuthEvent),
}

// ============================================================================
// Sync Events
// ============================================================================

/// Transient per-file progress of a reconciliation.
///
/// Always returns to `Idle` when `process()` finishes, whether it succeeded or
/// failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SyncProgressStatus {
    #[default]
    Idle,
    Syncing,
    Uploading,
    Downloading,
}

impl SyncProgressStatus {
    pub fn is_active(&self) -> bool {
        !matches!(self, SyncProgressStatus::Idle)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// Progress of `uid` on `authority` moved to `progress`
    ProgressChanged {
        authority: String,
        uid: String,
        progress: SyncProgressStatus,
    },
}

// ============================================================================
// Database Events
// ============================================================================

/// Result of writing the database back to its file system
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind")]
pub enum CommitOutcome {
    /// The write reached the backing store
    Immediate,
    /// The write landed locally and still needs to be synchronized
    Deferred,
    Failed { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DatabaseEvent {
    Committed {
        authority: String,
        uid: String,
        outcome: CommitOutcome,
    },
}

// ============================================================================
// Auth Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// New credentials were applied to the authority's authenticator
    CredentialsUpdated { authority: String },
    /// The backend rejected the current credentials
    AuthenticationRequired { authority: String, message: String },
}

// ============================================================================
// Event Bus
// ============================================================================

/// Cloneable handle to the broadcast channel
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Create a bus that buffers up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event, returning the number of subscribers that received it
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
