//! Per-file progress tracking
//!
//! Holds the in-memory [`SyncProgressStatus`] of every uid a processor has
//! touched and broadcasts each transition on the event bus.

use std::collections::HashMap;
use std::sync::Mutex;

use core_runtime::events::{CoreEvent, EventBus, SyncEvent, SyncProgressStatus};
use core_runtime::logging::redact_url_credentials;
use tracing::trace;

pub struct ProgressTracker {
    authority: String,
    event_bus: EventBus,
    states: Mutex<HashMap<String, SyncProgressStatus>>,
}

impl ProgressTracker {
    pub fn new(authority: impl Into<String>, event_bus: EventBus) -> Self {
        Self {
            authority: authority.into(),
            event_bus,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Current progress of `uid`; `Idle` when never touched
    pub fn get(&self, uid: &str) -> SyncProgressStatus {
        let states = match self.states.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        states.get(uid).copied().unwrap_or_default()
    }

    /// Record the transition, then broadcast it
    pub fn set(&self, uid: &str, progress: SyncProgressStatus) {
        {
            let mut states = match self.states.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if progress == SyncProgressStatus::Idle {
                states.remove(uid);
            } else {
                states.insert(uid.to_string(), progress);
            }
        }

        trace!(authority = %redact_url_credentials(&self.authority), uid, ?progress, "Progress changed");
        // No subscribers is fine.
        let _ = self.event_bus.emit(CoreEvent::Sync(SyncEvent::ProgressChanged {
            authority: self.authority.clone(),
            uid: uid.to_string(),
            progress,
        }));
    }
}
