//! # Git Repository
//!
//! Sync logic for one Git working copy, on top of a [`GitClient`].
//!
//! The remote is the source of truth; the working tree is the local cache.
//! Every operation starts with a fetch so decisions are made against the
//! current remote state.
//!
//! ## Pull
//!
//! A pull is one rebase-pull. When it neither fast-forwards nor rebases
//! cleanly, the working tree is hard-reset to HEAD and the pull is tried once
//! more. A second failure is [`GitError::PullFailed`].
//!
//! ## Resolution
//!
//! Settling divergent edits never rebases: both sides start from the
//! remote-tracking ref, so a local commit that was never pushed cannot keep
//! the file in conflict.

use tracing::{debug, info, instrument, warn};

use crate::client::{FileStatus, GitClient, PullStatus, Revision};
use crate::error::{GitError, Result};

/// Attempts per pull, including the one after the reset
const MAX_PULL_ATTEMPTS: usize = 2;

/// Modification times of one path, epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PathTimestamps {
    pub local: Option<i64>,
    pub cached_remote: Option<i64>,
    pub remote: Option<i64>,
}

pub struct GitRepository<C> {
    client: C,
}

impl<C: GitClient> GitRepository<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Local HEAD equals the remote-tracking ref
    ///
    /// Does not fetch.
    pub fn is_up_to_date(&self) -> Result<bool> {
        let remote = self.client.remote_head_id()?;
        Ok(self.client.head_id()?.as_deref() == Some(remote.as_str()))
    }

    /// Integrate the remote-tracking ref, retrying once after a reset
    #[instrument(skip(self))]
    pub fn pull(&self) -> Result<PullStatus> {
        let mut last = PullStatus::Failed;
        for attempt in 1..=MAX_PULL_ATTEMPTS {
            let status = self.client.rebase_pull()?;
            if status.is_success() {
                debug!(attempt, ?status, "Pulled");
                return Ok(status);
            }

            warn!(attempt, ?status, "Pull did not complete");
            last = status;
            if attempt < MAX_PULL_ATTEMPTS {
                self.client.reset_hard()?;
            }
        }
        Err(GitError::PullFailed(format!(
            "{:?} after {} attempts",
            last, MAX_PULL_ATTEMPTS
        )))
    }

    /// Commit `data` as the new content of `path` and push it
    ///
    /// When the remote moved, the working tree is reset and pulled first and
    /// `data` is written over the fresh tree.
    #[instrument(skip(self, data), fields(bytes = data.len()))]
    pub fn upload(&self, path: &str, data: &[u8]) -> Result<()> {
        self.client.fetch()?;
        if !self.is_up_to_date()? {
            self.client.reset_hard()?;
            self.pull()?;
        }

        self.client.write_file(path, data)?;

        if self.client.file_status(path)?.is_changed() {
            self.client.stage(path)?;
            self.client.commit(&format!("Update {}", path))?;
        } else {
            let (ahead, _) = self.client.ahead_behind()?;
            if ahead == 0 {
                return Err(GitError::NothingToCommit {
                    path: path.to_string(),
                });
            }
            debug!(ahead, "Pushing previously committed changes");
        }

        self.client.push()?;
        info!("Uploaded");
        Ok(())
    }

    /// Replace the working tree with the remote state
    ///
    /// Local uncommitted edits are discarded.
    #[instrument(skip(self))]
    pub fn download(&self, path: &str) -> Result<PathTimestamps> {
        self.client.fetch()?;
        self.client.reset_hard()?;
        if !self.is_up_to_date()? {
            self.pull()?;
        }
        info!("Downloaded");
        self.read_timestamps(path)
    }

    /// Make `data` the remote content of `path`, whatever local history says
    ///
    /// The branch is first moved to the remote-tracking ref, so an earlier
    /// commit that never reached the remote cannot conflict with the push.
    #[instrument(skip(self, data), fields(bytes = data.len()))]
    pub fn overwrite_remote(&self, path: &str, data: &[u8]) -> Result<()> {
        self.client.fetch()?;
        self.client.reset_to_upstream()?;
        self.client.write_file(path, data)?;

        if !self.client.file_status(path)?.is_changed() {
            debug!("Remote already holds the local content");
            return Ok(());
        }
        self.client.stage(path)?;
        self.client.commit(&format!("Update {}", path))?;
        self.client.push()?;
        info!("Overwrote remote");
        Ok(())
    }

    /// Take the remote state, dropping local edits and unpushed commits
    #[instrument(skip(self))]
    pub fn discard_local(&self, path: &str) -> Result<PathTimestamps> {
        self.client.fetch()?;
        self.client.reset_to_upstream()?;
        info!("Discarded local changes");
        self.read_timestamps(path)
    }

    /// Fetch, then compute the three timestamps of `path`
    pub fn timestamps(&self, path: &str) -> Result<PathTimestamps> {
        self.client.fetch()?;
        self.read_timestamps(path)
    }

    /// Timestamps of `path` against the refs as they are
    pub fn read_timestamps(&self, path: &str) -> Result<PathTimestamps> {
        let local = match self.client.file_status(path)? {
            FileStatus::Modified | FileStatus::New => self.client.modified_time(path)?,
            FileStatus::Unmodified => match self.client.last_commit_time(Revision::Head, path)? {
                Some(time) => Some(time),
                None => self.client.modified_time(path)?,
            },
            FileStatus::Deleted | FileStatus::Missing => None,
        };

        Ok(PathTimestamps {
            local,
            cached_remote: self.client.last_commit_time(Revision::MergeBase, path)?,
            remote: self.client.last_commit_time(Revision::Upstream, path)?,
        })
    }

    /// Revision token of the working copy: the local HEAD id
    pub fn revision(&self) -> Result<Option<String>> {
        self.client.head_id()
    }

    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.client.read_file(path)
    }

    /// Write `data` into the working tree without committing
    pub fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        self.client.write_file(path, data)
    }
}
