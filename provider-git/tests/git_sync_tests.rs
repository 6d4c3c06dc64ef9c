//! Integration tests for the Git provider
//!
//! Every test builds a bare remote in a temporary directory, seeds it from a
//! scratch repository, and points a `GitFileSystemProvider` at it through a
//! `file://` URL. A second clone plays the other device pushing changes.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bridge_desktop::SqliteSettingsStore;
use bytes::Bytes;
use core_fs::{CredentialAuthenticator, FileSystemProvider};
use core_runtime::events::EventBus;
use core_sync::{
    ConflictResolutionStrategy, FsAuthority, SyncError, SyncProcessor, SyncProgressStatus,
    SyncStatus, SyncStrategy, WriteOutcome,
};
use git2::{Commit, Oid, Repository, RepositoryInitOptions, Signature, Time};
use provider_git::{
    Git2Client, GitAuthor, GitClient, GitFileSystemProvider, GitRepository, RepositoryStore,
    Revision, SettingsRepositoryStore,
};
use tempfile::TempDir;

const VAULT: &str = "vault.kdbx";

// ============================================================================
// Fixtures
// ============================================================================

struct Fixture {
    root: TempDir,
    url: String,
    store: Arc<SettingsRepositoryStore>,
}

impl Fixture {
    async fn new() -> Self {
        let root = TempDir::new().unwrap();
        let remote = root.path().join("remote.git");
        let mut options = RepositoryInitOptions::new();
        options.bare(true).initial_head("main");
        Repository::init_opts(&remote, &options).unwrap();
        let url = format!("file://{}", remote.display());

        let seed = seed_repository(root.path(), &url);
        commit_file(&seed, VAULT, b"v1", now_secs() - 3_000);
        commit_file(&seed, "notes.txt", b"unrelated", now_secs() - 2_000);
        push(&seed);

        let settings = Arc::new(SqliteSettingsStore::in_memory().await.unwrap());
        Self {
            root,
            url,
            store: Arc::new(SettingsRepositoryStore::new(settings)),
        }
    }

    fn authority(&self) -> FsAuthority {
        FsAuthority::git(self.url.clone())
    }

    fn git_dir(&self) -> PathBuf {
        self.root.path().join("storage").join("git")
    }

    fn provider(&self) -> GitFileSystemProvider {
        GitFileSystemProvider::new(
            &self.authority(),
            self.store.clone(),
            self.git_dir(),
            GitAuthor {
                name: "Vault Sync".to_string(),
                email: "vault-sync@localhost".to_string(),
            },
            EventBus::new(64),
        )
    }

    /// Second device: clone, commit `data` at `when`, push
    fn push_from_other_device(&self, data: &[u8], when: i64) {
        let path = self.root.path().join(format!("other-{}", when));
        let other = Repository::clone(&self.url, &path).unwrap();
        commit_file(&other, VAULT, data, when);
        push(&other);
    }

    fn remote_content(&self, path: &str) -> Vec<u8> {
        let remote = Repository::open_bare(self.root.path().join("remote.git")).unwrap();
        let commit = remote
            .find_reference("refs/heads/main")
            .unwrap()
            .peel_to_commit()
            .unwrap();
        let entry = commit.tree().unwrap().get_path(Path::new(path)).unwrap();
        let data = remote.find_blob(entry.id()).unwrap().content().to_vec();
        data
    }

    /// Working copy the provider cloned into
    async fn workdir(&self) -> PathBuf {
        self.store.list().await.unwrap()[0].1.clone()
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

/// Non-bare repository on `main` with `url` as its only remote
fn seed_repository(root: &Path, url: &str) -> Repository {
    let mut options = RepositoryInitOptions::new();
    options.initial_head("main");
    let seed = Repository::init_opts(root.join("seed"), &options).unwrap();
    seed.remote("origin", url).unwrap();
    seed
}

fn commit_file(repo: &Repository, path: &str, data: &[u8], when: i64) -> Oid {
    fs::write(repo.workdir().unwrap().join(path), data).unwrap();
    let mut index = repo.index().unwrap();
    index.add_path(Path::new(path)).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();

    let signature = Signature::new("Other Device", "other@example.com", &Time::new(when, 0)).unwrap();
    let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
    let parents: Vec<&Commit> = parent.iter().collect();
    repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        &format!("Update {}", path),
        &tree,
        &parents,
    )
    .unwrap()
}

fn push(repo: &Repository) {
    let mut remote = repo.find_remote("origin").unwrap();
    remote
        .push(&["refs/heads/main:refs/heads/main"], None)
        .unwrap();
}

async fn status(provider: &GitFileSystemProvider) -> SyncStatus {
    provider.sync_processor().sync_status_for_file(VAULT).await
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_fresh_clone_is_in_sync_and_remembered() {
    let fixture = Fixture::new().await;
    let provider = fixture.provider();

    assert_eq!(status(&provider).await, SyncStatus::NoChanges);

    let entries = fixture.store.list().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, fixture.authority().key());
    assert!(entries[0].1.starts_with(fixture.git_dir()));
    assert!(entries[0].1.join(".git").exists());

    let file = provider.get_file(VAULT).await.unwrap();
    assert_eq!(provider.open_file_for_read(&file).await.unwrap(), Bytes::from_static(b"v1"));
}

#[tokio::test]
async fn test_second_provider_reopens_working_copy() {
    let fixture = Fixture::new().await;
    assert_eq!(status(&fixture.provider()).await, SyncStatus::NoChanges);
    let first = fixture.store.list().await.unwrap();

    assert_eq!(status(&fixture.provider()).await, SyncStatus::NoChanges);
    let second = fixture.store.list().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(fs::read_dir(fixture.git_dir()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_remote_change_is_downloaded() {
    let fixture = Fixture::new().await;
    let provider = fixture.provider();
    let processor = provider.sync_processor();
    assert_eq!(status(&provider).await, SyncStatus::NoChanges);
    let before = processor.revision(VAULT).await.unwrap();

    fixture.push_from_other_device(b"v2 from laptop", now_secs() - 1_000);
    assert_eq!(status(&provider).await, SyncStatus::RemoteChanges);

    let file = provider.get_file(VAULT).await.unwrap();
    let synced = processor
        .process(&file, Some(processor.preferred_strategy()), None)
        .await
        .unwrap();

    assert_eq!(synced.uid, VAULT);
    assert_eq!(
        provider.open_file_for_read(&file).await.unwrap(),
        Bytes::from_static(b"v2 from laptop")
    );
    assert_eq!(processor.sync_progress_for_file(VAULT), SyncProgressStatus::Idle);
    assert_eq!(status(&provider).await, SyncStatus::NoChanges);
    assert_ne!(processor.revision(VAULT).await.unwrap(), before);
}

#[tokio::test]
async fn test_deferred_write_is_uploaded() {
    let fixture = Fixture::new().await;
    let provider = fixture.provider();
    let processor = provider.sync_processor();
    assert_eq!(processor.preferred_strategy(), SyncStrategy::LastRemoteModificationWins);

    let file = provider.get_file(VAULT).await.unwrap();
    let outcome = provider
        .open_file_for_write(&file, Bytes::from_static(b"v2 local edit"))
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Deferred);
    assert_eq!(fixture.remote_content(VAULT), b"v1");
    assert_eq!(status(&provider).await, SyncStatus::LocalChanges);

    processor
        .process(&file, Some(SyncStrategy::LastRemoteModificationWins), None)
        .await
        .unwrap();

    assert_eq!(fixture.remote_content(VAULT), b"v2 local edit");
    assert_eq!(fixture.remote_content("notes.txt"), b"unrelated");
    assert_eq!(status(&provider).await, SyncStatus::NoChanges);
}

#[tokio::test]
async fn test_divergent_edits_round_trip() {
    let fixture = Fixture::new().await;
    let provider = fixture.provider();
    let processor = provider.sync_processor();
    assert_eq!(status(&provider).await, SyncStatus::NoChanges);

    // Remote moves past the shared base, local edit is newer still
    let remote_time = now_secs() + 500;
    fixture.push_from_other_device(b"v2 from laptop", remote_time);
    let file = provider.get_file(VAULT).await.unwrap();
    provider
        .open_file_for_write(&file, Bytes::from_static(b"v2 from phone"))
        .await
        .unwrap();
    let workdir = fixture.store.list().await.unwrap()[0].1.clone();
    fs::File::options()
        .write(true)
        .open(workdir.join(VAULT))
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(1_000))
        .unwrap();

    assert_eq!(status(&provider).await, SyncStatus::Conflict);

    let conflict = processor.sync_conflict_for_file(VAULT).await.unwrap();
    assert!(conflict.local_modified() > conflict.remote_modified());
    assert_eq!(conflict.remote_modified(), Some(remote_time * 1000));
    assert_eq!(conflict.local.uid, VAULT);

    let strategy = Some(SyncStrategy::LastRemoteModificationWins);
    let err = processor.process(&file, strategy, None).await.unwrap_err();
    assert!(matches!(err, SyncError::NeedsResolution { .. }));
    assert_eq!(processor.cached_sync_status(VAULT), Some(SyncStatus::Conflict));
    assert_eq!(fixture.remote_content(VAULT), b"v2 from laptop");

    processor
        .process(
            &file,
            strategy,
            Some(ConflictResolutionStrategy::ResolveWithLocalFile),
        )
        .await
        .unwrap();

    assert_eq!(fixture.remote_content(VAULT), b"v2 from phone");
    assert_eq!(processor.cached_sync_status(VAULT), Some(SyncStatus::NoChanges));
    assert_eq!(processor.sync_progress_for_file(VAULT), SyncProgressStatus::Idle);
}

#[tokio::test]
async fn test_resolve_with_remote_discards_local_edit() {
    let fixture = Fixture::new().await;
    let provider = fixture.provider();
    let processor = provider.sync_processor();
    assert_eq!(status(&provider).await, SyncStatus::NoChanges);

    fixture.push_from_other_device(b"v2 from laptop", now_secs() + 500);
    let file = provider.get_file(VAULT).await.unwrap();
    provider
        .open_file_for_write(&file, Bytes::from_static(b"v2 from phone"))
        .await
        .unwrap();
    let workdir = fixture.store.list().await.unwrap()[0].1.clone();
    fs::File::options()
        .write(true)
        .open(workdir.join(VAULT))
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(1_000))
        .unwrap();

    processor
        .process(
            &file,
            Some(SyncStrategy::LastRemoteModificationWins),
            Some(ConflictResolutionStrategy::ResolveWithRemoteFile),
        )
        .await
        .unwrap();

    assert_eq!(
        provider.open_file_for_read(&file).await.unwrap(),
        Bytes::from_static(b"v2 from laptop")
    );
    assert_eq!(status(&provider).await, SyncStatus::NoChanges);
}

/// Commits `data` in the provider's working copy without pushing it, as an
/// upload whose push never reached the remote leaves it
async fn commit_unpushed(fixture: &Fixture, data: &[u8], when: i64) {
    let local = Repository::open(fixture.workdir().await).unwrap();
    commit_file(&local, VAULT, data, when);
}

#[tokio::test]
async fn test_resolve_with_local_after_unpushed_commit() {
    let fixture = Fixture::new().await;
    let provider = fixture.provider();
    let processor = provider.sync_processor();
    assert_eq!(status(&provider).await, SyncStatus::NoChanges);

    commit_unpushed(&fixture, b"v2 from phone", now_secs() + 1_000).await;
    fixture.push_from_other_device(b"v2 from laptop", now_secs() + 500);
    assert_eq!(status(&provider).await, SyncStatus::Conflict);

    let file = provider.get_file(VAULT).await.unwrap();
    processor
        .process(
            &file,
            Some(SyncStrategy::LastRemoteModificationWins),
            Some(ConflictResolutionStrategy::ResolveWithLocalFile),
        )
        .await
        .unwrap();

    assert_eq!(fixture.remote_content(VAULT), b"v2 from phone");
    assert_eq!(fixture.remote_content("notes.txt"), b"unrelated");
    assert_eq!(status(&provider).await, SyncStatus::NoChanges);
}

#[tokio::test]
async fn test_resolve_with_remote_after_unpushed_commit() {
    let fixture = Fixture::new().await;
    let provider = fixture.provider();
    let processor = provider.sync_processor();
    assert_eq!(status(&provider).await, SyncStatus::NoChanges);

    commit_unpushed(&fixture, b"v2 from phone", now_secs() + 1_000).await;
    fixture.push_from_other_device(b"v2 from laptop", now_secs() + 500);
    assert_eq!(status(&provider).await, SyncStatus::Conflict);

    let file = provider.get_file(VAULT).await.unwrap();
    processor
        .process(
            &file,
            Some(SyncStrategy::LastRemoteModificationWins),
            Some(ConflictResolutionStrategy::ResolveWithRemoteFile),
        )
        .await
        .unwrap();

    assert_eq!(
        provider.open_file_for_read(&file).await.unwrap(),
        Bytes::from_static(b"v2 from laptop")
    );
    assert_eq!(fixture.remote_content(VAULT), b"v2 from laptop");
    assert_eq!(status(&provider).await, SyncStatus::NoChanges);
}

#[tokio::test]
async fn test_missing_file_status() {
    let fixture = Fixture::new().await;
    let provider = fixture.provider();
    assert_eq!(
        provider
            .sync_processor()
            .sync_status_for_file("absent.kdbx")
            .await,
        SyncStatus::FileNotFound
    );
}

#[tokio::test]
async fn test_listing_hides_git_directory() {
    let fixture = Fixture::new().await;
    let provider = fixture.provider();
    // Opens the working copy
    assert_eq!(status(&provider).await, SyncStatus::NoChanges);

    let root = provider.get_root_file().await.unwrap();
    let names: Vec<_> = provider
        .list_files(&root)
        .await
        .unwrap()
        .into_iter()
        .map(|file| file.name)
        .collect();
    assert_eq!(names, vec!["notes.txt".to_string(), VAULT.to_string()]);

    let file = provider.get_file(VAULT).await.unwrap();
    assert!(provider.exists(&file).await.unwrap());
    assert_eq!(provider.get_parent(&file).await.unwrap(), Some(root.clone()));
    assert_eq!(provider.get_parent(&root).await.unwrap(), None);

    let absent = provider.get_file("absent.kdbx").await.unwrap();
    assert!(!provider.exists(&absent).await.unwrap());
}

#[test]
fn test_per_file_history_walk() {
    let root = TempDir::new().unwrap();
    let remote = root.path().join("remote.git");
    let mut options = RepositoryInitOptions::new();
    options.bare(true).initial_head("main");
    Repository::init_opts(&remote, &options).unwrap();
    let url = format!("file://{}", remote.display());

    let seed = seed_repository(root.path(), &url);
    commit_file(&seed, VAULT, b"v1", 1_000_000);
    commit_file(&seed, "notes.txt", b"later", 2_000_000);
    push(&seed);

    let authority = FsAuthority::git(url.clone());
    let client = Git2Client::clone_into(
        &url,
        &root.path().join("work"),
        Arc::new(CredentialAuthenticator::new(&authority)),
        ("Vault Sync", "vault-sync@localhost"),
    )
    .unwrap();

    assert_eq!(
        client.last_commit_time(Revision::Head, VAULT).unwrap(),
        Some(1_000_000_000)
    );
    assert_eq!(
        client.last_commit_time(Revision::Upstream, "notes.txt").unwrap(),
        Some(2_000_000_000)
    );
    assert_eq!(client.last_commit_time(Revision::Head, "absent").unwrap(), None);

    let repository = GitRepository::new(client);
    assert!(repository.is_up_to_date().unwrap());
    let timestamps = repository.read_timestamps(VAULT).unwrap();
    assert_eq!(timestamps.local, Some(1_000_000_000));
    assert_eq!(timestamps.cached_remote, Some(1_000_000_000));
    assert_eq!(timestamps.remote, Some(1_000_000_000));
}
