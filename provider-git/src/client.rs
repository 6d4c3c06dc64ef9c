//! # Git Client
//!
//! Blocking, single-working-copy Git operations.
//!
//! [`GitClient`] is the seam between the repository logic in
//! [`GitRepository`](crate::repository::GitRepository) and libgit2: the
//! logic is tested against a mocked client, [`Git2Client`] is the real one.
//! Every call blocks; callers run them on the blocking pool.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use core_auth::Credentials;
use core_fs::Authenticator;
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    Cred, ErrorClass, ErrorCode, FetchOptions, ObjectType, Oid, PushOptions, RebaseOptions,
    RemoteCallbacks, Repository, ResetType, Signature, Sort, Status,
};
use tracing::{debug, info, warn};

use crate::error::{GitError, Result};

/// Username sent with token credentials when the URL carries none
const TOKEN_USERNAME: &str = "x-access-token";

/// Outcome of one rebase-pull
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullStatus {
    UpToDate,
    FastForward,
    /// Local commits were replayed on top of the remote
    Rebased,
    /// Replaying a local commit conflicted; the rebase was aborted
    Conflicts,
    /// The rebase could not run to completion
    Failed,
}

impl PullStatus {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            PullStatus::UpToDate | PullStatus::FastForward | PullStatus::Rebased
        )
    }
}

/// Working-tree state of one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    /// Same as HEAD; ignored files are reported here too
    Unmodified,
    Modified,
    /// Not tracked yet
    New,
    Deleted,
    /// Neither in HEAD nor in the working tree
    Missing,
}

impl FileStatus {
    pub fn is_changed(&self) -> bool {
        matches!(self, FileStatus::Modified | FileStatus::New)
    }
}

/// Commit a per-file history walk starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revision {
    Head,
    /// Remote-tracking ref of the current branch
    Upstream,
    /// Merge base of `Head` and `Upstream`
    MergeBase,
}

/// Operations on one working copy with exactly one remote
pub trait GitClient: Send {
    fn workdir(&self) -> PathBuf;

    /// Update the remote-tracking refs
    fn fetch(&self) -> Result<()>;

    /// Id of HEAD; `None` on an unborn branch
    fn head_id(&self) -> Result<Option<String>>;

    /// Id of the current branch's remote-tracking ref
    ///
    /// # Errors
    ///
    /// [`GitError::NoRemote`], [`GitError::MultipleRemotes`] or
    /// [`GitError::NoUpstream`] when the repository is not set up for sync.
    fn remote_head_id(&self) -> Result<String>;

    /// Commits (ahead, behind) relative to the remote-tracking ref
    fn ahead_behind(&self) -> Result<(usize, usize)>;

    /// Integrate the remote-tracking ref into the current branch
    fn rebase_pull(&self) -> Result<PullStatus>;

    /// Discard working-tree and index changes to tracked files
    fn reset_hard(&self) -> Result<()>;

    /// Move the current branch to the remote-tracking ref and check it out
    ///
    /// Local commits the remote does not have are dropped.
    fn reset_to_upstream(&self) -> Result<()>;

    fn file_status(&self, path: &str) -> Result<FileStatus>;

    fn stage(&self, path: &str) -> Result<()>;

    /// Commit the index on top of HEAD and return the new id
    fn commit(&self, message: &str) -> Result<String>;

    /// Push the current branch
    ///
    /// # Errors
    ///
    /// [`GitError::PushRejected`] when the remote refuses any reference update.
    fn push(&self) -> Result<()>;

    /// Commit time (epoch ms) of the newest commit reachable from `revision`
    /// that changed `path`
    fn last_commit_time(&self, revision: Revision, path: &str) -> Result<Option<i64>>;

    /// Working-tree modification time (epoch ms); `None` when absent
    fn modified_time(&self, path: &str) -> Result<Option<i64>>;

    fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    fn write_file(&self, path: &str, data: &[u8]) -> Result<()>;
}

/// [`GitClient`] on libgit2
pub struct Git2Client {
    repo: Repository,
    workdir: PathBuf,
    authenticator: Arc<dyn Authenticator>,
    author_name: String,
    author_email: String,
}

impl Git2Client {
    pub fn open(
        path: &Path,
        authenticator: Arc<dyn Authenticator>,
        author: (&str, &str),
    ) -> Result<Self> {
        let repo = Repository::open(path)?;
        Self::from_repository(repo, authenticator, author)
    }

    /// Clone `url` into `path` and open the result
    pub fn clone_into(
        url: &str,
        path: &Path,
        authenticator: Arc<dyn Authenticator>,
        author: (&str, &str),
    ) -> Result<Self> {
        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(remote_callbacks(authenticator.credentials()));

        let repo = RepoBuilder::new()
            .fetch_options(fetch_options)
            .clone(url, path)?;
        info!(path = %path.display(), "Cloned repository");
        Self::from_repository(repo, authenticator, author)
    }

    fn from_repository(
        repo: Repository,
        authenticator: Arc<dyn Authenticator>,
        (author_name, author_email): (&str, &str),
    ) -> Result<Self> {
        let workdir = repo
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| GitError::InvalidPath("bare repository".to_string()))?;
        Ok(Self {
            repo,
            workdir,
            authenticator,
            author_name: author_name.to_string(),
            author_email: author_email.to_string(),
        })
    }

    fn signature(&self) -> Result<Signature<'static>> {
        Ok(self
            .repo
            .signature()
            .or_else(|_| Signature::now(&self.author_name, &self.author_email))?)
    }

    fn remote_name(&self) -> Result<String> {
        let remotes = self.repo.remotes()?;
        match remotes.len() {
            0 => Err(GitError::NoRemote),
            1 => remotes
                .get(0)
                .map(str::to_string)
                .ok_or(GitError::NoRemote),
            n => Err(GitError::MultipleRemotes(n)),
        }
    }

    /// Short name of the current branch, also on an unborn HEAD
    fn current_branch(&self) -> Result<String> {
        let head = self.repo.find_reference("HEAD")?;
        head.symbolic_target()
            .and_then(|target| target.strip_prefix("refs/heads/"))
            .map(str::to_string)
            .ok_or(GitError::DetachedHead)
    }

    fn head_oid(&self) -> Result<Option<Oid>> {
        match self.repo.head() {
            Ok(head) => Ok(head.target()),
            Err(e) if e.code() == ErrorCode::UnbornBranch => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn upstream_oid(&self) -> Result<Oid> {
        let remote = self.remote_name()?;
        let branch = self.current_branch()?;
        let refname = format!("refs/remotes/{}/{}", remote, branch);
        match self.repo.refname_to_id(&refname) {
            Ok(oid) => Ok(oid),
            Err(e) if e.code() == ErrorCode::NotFound => Err(GitError::NoUpstream { branch }),
            Err(e) => Err(e.into()),
        }
    }

    fn revision_oid(&self, revision: Revision) -> Result<Option<Oid>> {
        match revision {
            Revision::Head => self.head_oid(),
            Revision::Upstream => self.upstream_oid().map(Some),
            Revision::MergeBase => {
                let Some(head) = self.head_oid()? else {
                    return Ok(None);
                };
                let upstream = self.upstream_oid()?;
                match self.repo.merge_base(head, upstream) {
                    Ok(oid) => Ok(Some(oid)),
                    Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    fn worktree_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let valid = !path.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !valid {
            return Err(GitError::InvalidPath(path.to_string()));
        }
        Ok(self.workdir.join(relative))
    }

    fn rebase_onto(&self, upstream: Oid) -> Result<PullStatus> {
        let head = self.repo.head()?;
        let local = self.repo.reference_to_annotated_commit(&head)?;
        let upstream = self.repo.find_annotated_commit(upstream)?;
        let signature = self.signature()?;

        let mut options = RebaseOptions::new();
        let mut rebase = self
            .repo
            .rebase(Some(&local), Some(&upstream), None, Some(&mut options))?;

        while let Some(operation) = rebase.next() {
            if let Err(e) = operation {
                warn!(error = %e, "Rebase step failed");
                rebase.abort()?;
                return Ok(PullStatus::Failed);
            }
            if self.repo.index()?.has_conflicts() {
                debug!("Rebase step conflicted");
                rebase.abort()?;
                return Ok(PullStatus::Conflicts);
            }
            match rebase.commit(None, &signature, None) {
                Ok(_) => {}
                // The remote already contains this change
                Err(e) if e.code() == ErrorCode::Applied => {}
                Err(e) => {
                    warn!(error = %e, "Failed to commit rebased change");
                    rebase.abort()?;
                    return Ok(PullStatus::Failed);
                }
            }
        }

        rebase.finish(Some(&signature))?;
        Ok(PullStatus::Rebased)
    }
}

impl GitClient for Git2Client {
    fn workdir(&self) -> PathBuf {
        self.workdir.clone()
    }

    fn fetch(&self) -> Result<()> {
        let mut remote = self.repo.find_remote(&self.remote_name()?)?;
        let mut options = FetchOptions::new();
        options.remote_callbacks(remote_callbacks(self.authenticator.credentials()));

        remote.fetch(&[] as &[&str], Some(&mut options), None)?;
        debug!("Fetched remote");
        Ok(())
    }

    fn head_id(&self) -> Result<Option<String>> {
        Ok(self.head_oid()?.map(|oid| oid.to_string()))
    }

    fn remote_head_id(&self) -> Result<String> {
        Ok(self.upstream_oid()?.to_string())
    }

    fn ahead_behind(&self) -> Result<(usize, usize)> {
        let upstream = self.upstream_oid()?;
        match self.head_oid()? {
            Some(head) => Ok(self.repo.graph_ahead_behind(head, upstream)?),
            None => Ok((0, 0)),
        }
    }

    fn rebase_pull(&self) -> Result<PullStatus> {
        let upstream = self.upstream_oid()?;
        let branch = self.current_branch()?;
        let refname = format!("refs/heads/{}", branch);

        let Some(head) = self.head_oid()? else {
            // Unborn branch: adopt the remote history as is
            self.repo
                .reference(&refname, upstream, true, "pull: initial checkout")?;
            self.repo.set_head(&refname)?;
            self.repo
                .checkout_head(Some(CheckoutBuilder::default().force()))?;
            return Ok(PullStatus::FastForward);
        };

        let annotated = self.repo.find_annotated_commit(upstream)?;
        let (analysis, _) = self.repo.merge_analysis(&[&annotated])?;

        if analysis.is_up_to_date() {
            return Ok(PullStatus::UpToDate);
        }

        if analysis.is_fast_forward() {
            let mut reference = self.repo.find_reference(&refname)?;
            reference.set_target(upstream, &format!("pull: fast-forward to {}", upstream))?;
            self.repo
                .checkout_head(Some(CheckoutBuilder::default().force()))?;
            debug!(from = %head, to = %upstream, "Fast-forwarded");
            return Ok(PullStatus::FastForward);
        }

        self.rebase_onto(upstream)
    }

    fn reset_hard(&self) -> Result<()> {
        self.repo.cleanup_state()?;
        let Some(head) = self.head_oid()? else {
            return Ok(());
        };
        let target = self.repo.find_object(head, Some(ObjectType::Commit))?;
        self.repo.reset(
            &target,
            ResetType::Hard,
            Some(CheckoutBuilder::default().force()),
        )?;
        Ok(())
    }

    fn reset_to_upstream(&self) -> Result<()> {
        self.repo.cleanup_state()?;
        let upstream = self.upstream_oid()?;
        let target = self.repo.find_object(upstream, Some(ObjectType::Commit))?;
        self.repo.reset(
            &target,
            ResetType::Hard,
            Some(CheckoutBuilder::default().force()),
        )?;
        debug!(to = %upstream, "Reset to remote-tracking ref");
        Ok(())
    }

    fn file_status(&self, path: &str) -> Result<FileStatus> {
        self.worktree_path(path)?;
        let status = match self.repo.status_file(Path::new(path)) {
            Ok(status) => status,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(FileStatus::Missing),
            Err(e) => return Err(e.into()),
        };

        let file_status = if status.intersects(Status::WT_DELETED | Status::INDEX_DELETED) {
            FileStatus::Deleted
        } else if status.intersects(Status::WT_NEW | Status::INDEX_NEW) {
            FileStatus::New
        } else if status.intersects(
            Status::WT_MODIFIED
                | Status::INDEX_MODIFIED
                | Status::WT_TYPECHANGE
                | Status::INDEX_TYPECHANGE
                | Status::WT_RENAMED
                | Status::INDEX_RENAMED,
        ) {
            FileStatus::Modified
        } else {
            FileStatus::Unmodified
        };
        Ok(file_status)
    }

    fn stage(&self, path: &str) -> Result<()> {
        let absolute = self.worktree_path(path)?;
        let mut index = self.repo.index()?;
        if absolute.exists() {
            index.add_path(Path::new(path))?;
        } else {
            index.remove_path(Path::new(path))?;
        }
        index.write()?;
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<String> {
        let signature = self.signature()?;
        let mut index = self.repo.index()?;
        let tree = self.repo.find_tree(index.write_tree()?)?;

        let parent = match self.head_oid()? {
            Some(oid) => Some(self.repo.find_commit(oid)?),
            None => None,
        };
        let parents: Vec<_> = parent.iter().collect();

        let oid = self
            .repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
        info!(commit = %oid, "Created commit");
        Ok(oid.to_string())
    }

    fn push(&self) -> Result<()> {
        let remote_name = self.remote_name()?;
        let branch = self.current_branch()?;
        let refspec = format!("refs/heads/{}:refs/heads/{}", branch, branch);
        let mut remote = self.repo.find_remote(&remote_name)?;

        let mut rejection: Option<(String, String)> = None;
        {
            let mut callbacks = remote_callbacks(self.authenticator.credentials());
            callbacks.push_update_reference(|reference, status| {
                if let Some(message) = status {
                    rejection = Some((reference.to_string(), message.to_string()));
                }
                Ok(())
            });
            let mut options = PushOptions::new();
            options.remote_callbacks(callbacks);
            remote.push(&[refspec.as_str()], Some(&mut options))?;
        }

        if let Some((reference, message)) = rejection {
            return Err(GitError::PushRejected { reference, message });
        }
        info!(remote = %remote_name, branch = %branch, "Pushed");
        Ok(())
    }

    fn last_commit_time(&self, revision: Revision, path: &str) -> Result<Option<i64>> {
        let Some(start) = self.revision_oid(revision)? else {
            return Ok(None);
        };
        let path = Path::new(path);

        let mut revwalk = self.repo.revwalk()?;
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
        revwalk.push(start)?;

        for oid in revwalk {
            let commit = self.repo.find_commit(oid?)?;
            let entry = tree_entry_id(&commit, path)?;

            let changed = if commit.parent_count() == 0 {
                entry.is_some()
            } else {
                // Changed only if it differs from every parent
                let mut changed = true;
                for parent in commit.parents() {
                    if tree_entry_id(&parent, path)? == entry {
                        changed = false;
                        break;
                    }
                }
                changed
            };

            if changed {
                return Ok(Some(commit.time().seconds() * 1000));
            }
        }
        Ok(None)
    }

    fn modified_time(&self, path: &str) -> Result<Option<i64>> {
        let absolute = self.worktree_path(path)?;
        let metadata = match fs::metadata(&absolute) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let modified = metadata.modified()?;
        let millis = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Ok(Some(millis))
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.worktree_path(path)?)?)
    }

    fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let absolute = self.worktree_path(path)?;
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(absolute, data)?;
        Ok(())
    }
}

fn tree_entry_id(commit: &git2::Commit<'_>, path: &Path) -> Result<Option<Oid>> {
    match commit.tree()?.get_path(path) {
        Ok(entry) => Ok(Some(entry.id())),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Callbacks answering credential requests from `credentials`
///
/// libgit2 asks again after a rejected attempt; the second request fails
/// with an authentication error instead of looping.
fn remote_callbacks<'a>(credentials: Option<Credentials>) -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    let mut attempts = 0u32;
    callbacks.credentials(move |_url, username_from_url, _allowed| {
        attempts += 1;
        if attempts > 1 {
            return Err(auth_error("credentials rejected by remote"));
        }
        match &credentials {
            Some(Credentials::UserPassword { username, password }) => {
                Cred::userpass_plaintext(username, password)
            }
            Some(Credentials::Token { token }) => {
                Cred::userpass_plaintext(username_from_url.unwrap_or(TOKEN_USERNAME), token)
            }
            None => Err(auth_error("remote requires credentials")),
        }
    });
    callbacks
}

fn auth_error(message: &str) -> git2::Error {
    git2::Error::new(ErrorCode::Auth, ErrorClass::Callback, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_status_success() {
        assert!(PullStatus::UpToDate.is_success());
        assert!(PullStatus::FastForward.is_success());
        assert!(PullStatus::Rebased.is_success());
        assert!(!PullStatus::Conflicts.is_success());
        assert!(!PullStatus::Failed.is_success());
    }

    #[test]
    fn test_callbacks_give_up_after_rejection() {
        let error = auth_error("credentials rejected by remote");
        assert_eq!(error.code(), ErrorCode::Auth);
        assert!(crate::error::GitError::Git(error).is_auth());
    }
}
