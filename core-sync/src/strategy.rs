//! Sync direction resolution
//!
//! Maps the three timestamps known for a file to a [`SyncResolution`]. A
//! missing timestamp is older than any present one.

use std::cmp::Ordering;

use crate::status::{SyncResolution, SyncStrategy};

/// Pure resolver from timestamps to a sync direction
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncStrategyResolver;

impl SyncStrategyResolver {
    /// Decide which side of a file wins
    ///
    /// # Arguments
    ///
    /// * `local_modified` - modification time of the local copy
    /// * `cached_remote_modified` - remote time the local copy was based on
    /// * `remote_modified` - current remote modification time
    /// * `strategy` - comparison rule
    ///
    /// # Example
    ///
    /// ```
    /// use core_sync::{SyncResolution, SyncStrategy, SyncStrategyResolver};
    ///
    /// let verdict = SyncStrategyResolver::resolve(
    ///     Some(200),
    ///     Some(50),
    ///     Some(150),
    ///     SyncStrategy::LastRemoteModificationWins,
    /// );
    /// assert_eq!(verdict, SyncResolution::Error);
    /// ```
    pub fn resolve(
        local_modified: Option<i64>,
        cached_remote_modified: Option<i64>,
        remote_modified: Option<i64>,
        strategy: SyncStrategy,
    ) -> SyncResolution {
        // Option's ordering already places None below every Some.
        match (remote_modified.cmp(&local_modified), strategy) {
            (Ordering::Greater, _) => SyncResolution::Remote,
            (Ordering::Equal, _) => SyncResolution::Equal,
            (Ordering::Less, SyncStrategy::LastModificationWins) => SyncResolution::Local,
            (Ordering::Less, SyncStrategy::LastRemoteModificationWins) => {
                if remote_modified > cached_remote_modified {
                    SyncResolution::Error
                } else {
                    SyncResolution::Local
                }
            }
        }
    }
}
