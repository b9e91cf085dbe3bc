//! Integration tests for the git poller against real repositories.
//!
//! Each test builds a scratch "remote" repository with real git, points a
//! poller at it, and checks the change records that reach the in-memory
//! store.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use bosun_poller::{BranchSpec, GitClient, GitPoller, PollerConfig, PollerError};
use bosun_store::{ChangeStore, CursorStore, MemoryChangeStore};

fn run_git(repo_dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Create a repository with one initial commit on `main`.
fn make_remote() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    run_git(dir.path(), &["init", "-b", "main"]);
    run_git(dir.path(), &["config", "user.name", "test-user"]);
    run_git(dir.path(), &["config", "user.email", "test@example.com"]);
    let h0 = commit_file(dir.path(), "README.md", "initial");
    (dir, h0)
}

/// Commit a one-file change and return the new HEAD sha.
fn commit_file(repo_dir: &Path, file: &str, message: &str) -> String {
    std::fs::write(repo_dir.join(file), message).unwrap();
    run_git(repo_dir, &["add", file]);
    run_git(repo_dir, &["commit", "-m", message]);
    run_git(repo_dir, &["rev-parse", "HEAD"])
}

fn poller_for(
    remote: &Path,
    workdir: PathBuf,
    branches: Vec<BranchSpec>,
) -> (GitPoller, Arc<MemoryChangeStore>) {
    let store = Arc::new(MemoryChangeStore::new());
    let mut config = PollerConfig::new(remote.to_string_lossy(), workdir);
    config.branches = branches;
    let poller = GitPoller::new(config, store.clone()).unwrap();
    (poller, store)
}

#[tokio::test]
async fn poll_emits_three_new_commits_oldest_first() {
    let (remote, _h0) = make_remote();
    let wd = tempfile::tempdir().unwrap();
    let workdir = wd.path().join("work");
    let (poller, store) = poller_for(remote.path(), workdir.clone(), vec![BranchSpec::tracking("main")]);

    poller.initialize().await.unwrap();

    let h1 = commit_file(remote.path(), "a.txt", "first change");
    let h2 = commit_file(remote.path(), "b.txt", "second change");
    let h3 = commit_file(remote.path(), "c.txt", "third change");

    let count = poller.poll().await.unwrap();
    assert_eq!(count, 3);
    assert_eq!(poller.status().await.change_count, 3);

    let changes = store.changes_after(None).await.unwrap();
    let revisions: Vec<_> = changes.iter().map(|c| c.revision.clone()).collect();
    assert_eq!(revisions, vec![h1.clone(), h2, h3.clone()]);

    let first = &changes[0];
    assert_eq!(first.branch, "main");
    assert_eq!(first.author, "test@example.com");
    assert_eq!(first.files, vec!["a.txt".to_string()]);
    assert_eq!(first.comments, "first change");
    assert!(!first.skip_build);

    // Catch-up moved the local tracking ref to the remote tip.
    let git = GitClient::new("git", &workdir);
    assert_eq!(git.rev_parse("main").await.unwrap(), h3);
}

#[tokio::test]
async fn second_poll_emits_nothing_new() {
    let (remote, _h0) = make_remote();
    let wd = tempfile::tempdir().unwrap();
    let (poller, store) = poller_for(
        remote.path(),
        wd.path().join("work"),
        vec![BranchSpec::tracking("main")],
    );
    poller.initialize().await.unwrap();

    commit_file(remote.path(), "a.txt", "first change");
    assert_eq!(poller.poll().await.unwrap(), 1);

    // No remote movement since the last cycle.
    assert_eq!(poller.poll().await.unwrap(), 0);
    assert_eq!(store.changes_after(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn initialize_is_idempotent() {
    let (remote, _h0) = make_remote();
    let wd = tempfile::tempdir().unwrap();
    let (poller, store) = poller_for(
        remote.path(),
        wd.path().join("work"),
        vec![BranchSpec::tracking("main")],
    );
    poller.initialize().await.unwrap();
    poller.initialize().await.unwrap();

    commit_file(remote.path(), "a.txt", "first change");
    assert_eq!(poller.poll().await.unwrap(), 1);
    assert_eq!(store.changes_after(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn initialize_fails_for_missing_remote_branch() {
    let (remote, _h0) = make_remote();
    let wd = tempfile::tempdir().unwrap();
    let (poller, _store) = poller_for(
        remote.path(),
        wd.path().join("work"),
        vec![BranchSpec::tracking("no-such-branch")],
    );
    let err = poller.initialize().await.unwrap_err();
    assert!(matches!(err, PollerError::Git { .. }));
}

#[tokio::test]
async fn bare_mode_polls_and_catches_up() {
    let (remote, _h0) = make_remote();
    let wd = tempfile::tempdir().unwrap();
    let workdir = wd.path().join("bare-work");
    let store = Arc::new(MemoryChangeStore::new());
    let mut config = PollerConfig::new(remote.path().to_string_lossy(), workdir.clone());
    config.branch = Some("main".to_string());
    config.bare = true;
    let poller = GitPoller::new(config, store.clone()).unwrap();
    poller.initialize().await.unwrap();

    let h1 = commit_file(remote.path(), "a.txt", "bare change");
    assert_eq!(poller.poll().await.unwrap(), 1);

    let git = GitClient::new("git", &workdir);
    assert_eq!(git.rev_parse("main").await.unwrap(), h1);
}

#[tokio::test]
async fn multi_branch_poll_emits_per_branch_changes() {
    let (remote, _h0) = make_remote();
    run_git(remote.path(), &["checkout", "-b", "dev"]);
    run_git(remote.path(), &["checkout", "main"]);

    let wd = tempfile::tempdir().unwrap();
    let (poller, store) = poller_for(
        remote.path(),
        wd.path().join("work"),
        vec![BranchSpec::tracking("main"), BranchSpec::tracking("dev")],
    );
    poller.initialize().await.unwrap();

    let m1 = commit_file(remote.path(), "m.txt", "on main");
    run_git(remote.path(), &["checkout", "dev"]);
    let d1 = commit_file(remote.path(), "d.txt", "on dev");
    run_git(remote.path(), &["checkout", "main"]);

    assert_eq!(poller.poll().await.unwrap(), 2);

    let changes = store.changes_after(None).await.unwrap();
    let main_revs: Vec<_> = changes
        .iter()
        .filter(|c| c.branch == "main")
        .map(|c| c.revision.clone())
        .collect();
    let dev_revs: Vec<_> = changes
        .iter()
        .filter(|c| c.branch == "dev")
        .map(|c| c.revision.clone())
        .collect();
    assert_eq!(main_revs, vec![m1]);
    assert_eq!(dev_revs, vec![d1]);
}

#[tokio::test]
async fn failing_branch_does_not_block_others() {
    let (remote, _h0) = make_remote();
    run_git(remote.path(), &["checkout", "-b", "dev"]);
    run_git(remote.path(), &["checkout", "main"]);

    let wd = tempfile::tempdir().unwrap();
    let workdir = wd.path().join("work");
    let (poller, store) = poller_for(
        remote.path(),
        workdir.clone(),
        vec![BranchSpec::tracking("main"), BranchSpec::tracking("dev")],
    );
    poller.initialize().await.unwrap();

    // Sabotage the main tracking ref; dev must still poll.
    run_git(&workdir, &["checkout", "dev"]);
    run_git(&workdir, &["branch", "-D", "main"]);

    run_git(remote.path(), &["checkout", "dev"]);
    let d1 = commit_file(remote.path(), "d.txt", "on dev");

    let err = poller.poll().await.unwrap_err();
    assert!(matches!(err, PollerError::PollFailed));

    let changes = store.changes_after(None).await.unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].revision, d1);
}

#[tokio::test]
async fn failed_branch_keeps_its_tracking_ref_until_retry() {
    let (remote, h0) = make_remote();
    run_git(remote.path(), &["branch", "dev"]);

    let wd = tempfile::tempdir().unwrap();
    let workdir = wd.path().join("bare-work");
    let store = Arc::new(MemoryChangeStore::new());
    let mut config = PollerConfig::new(remote.path().to_string_lossy(), workdir.clone());
    config.branches = vec![BranchSpec::tracking("main"), BranchSpec::tracking("dev")];
    config.bare = true;
    let poller = GitPoller::new(config, store.clone()).unwrap();
    poller.initialize().await.unwrap();

    let m1 = commit_file(remote.path(), "m.txt", "on main");
    run_git(remote.path(), &["checkout", "dev"]);
    let d1 = commit_file(remote.path(), "d.txt", "on dev");
    run_git(remote.path(), &["checkout", "main"]);

    // Point main's local ref at a tree object so its poll fails this
    // cycle (not a commit); fetch and the dev branch are unaffected.
    let main_ref = workdir.join("refs/heads/main");
    let tree = run_git(&workdir, &["rev-parse", "origin/main^{tree}"]);
    std::fs::write(&main_ref, format!("{tree}\n")).unwrap();

    let err = poller.poll().await.unwrap_err();
    assert!(matches!(err, PollerError::PollFailed));

    // dev's commit came through and its ref caught up.
    let changes = store.changes_after(None).await.unwrap();
    let revisions: Vec<_> = changes.iter().map(|c| c.revision.clone()).collect();
    assert_eq!(revisions, vec![d1.clone()]);
    let git = GitClient::new("git", &workdir);
    assert_eq!(git.rev_parse("dev").await.unwrap(), d1);

    // The failed branch's ref was not advanced past the unemitted commit.
    assert_eq!(
        std::fs::read_to_string(&main_ref).unwrap().trim(),
        tree
    );

    // Once the ref is repaired, the retry cycle emits exactly the commit
    // that was pending when the failure struck.
    std::fs::write(&main_ref, format!("{h0}\n")).unwrap();
    assert_eq!(poller.poll().await.unwrap(), 1);
    let changes = store.changes_after(None).await.unwrap();
    let revisions: Vec<_> = changes.iter().map(|c| c.revision.clone()).collect();
    assert_eq!(revisions, vec![d1, m1.clone()]);
    assert_eq!(git.rev_parse("main").await.unwrap(), m1);
}

#[tokio::test]
async fn backfill_skips_history_shared_with_known_branch() {
    let (remote, _c0) = make_remote();
    let c1 = commit_file(remote.path(), "shared.txt", "shared history");
    run_git(remote.path(), &["checkout", "-b", "topic"]);
    let t1 = commit_file(remote.path(), "t1.txt", "topic one");
    let t2 = commit_file(remote.path(), "t2.txt", "topic two");
    run_git(remote.path(), &["checkout", "main"]);

    let wd = tempfile::tempdir().unwrap();
    let (poller, store) = poller_for(
        remote.path(),
        wd.path().join("work"),
        vec![
            BranchSpec::tracking("main"),
            BranchSpec::tracking("topic").with_all_history(),
        ],
    );
    poller.initialize().await.unwrap();

    // Backfill scopes topic history to merge-base(main tip)..topic tip, so
    // c0/c1 are never re-emitted.
    assert_eq!(poller.poll().await.unwrap(), 2);
    let changes = store.changes_after(None).await.unwrap();
    let revisions: Vec<_> = changes.iter().map(|c| c.revision.clone()).collect();
    assert_eq!(revisions, vec![t1, t2]);
    assert!(!revisions.contains(&c1));
    assert!(changes.iter().all(|c| c.skip_build));
    assert!(changes.iter().all(|c| c.branch == "topic"));

    assert!(poller.status().await.pending_backfill.is_empty());
}

#[tokio::test]
async fn full_history_backfill_when_nothing_else_is_known() {
    let (remote, h0) = make_remote();
    let h1 = commit_file(remote.path(), "a.txt", "second commit");

    let wd = tempfile::tempdir().unwrap();
    let (poller, store) = poller_for(
        remote.path(),
        wd.path().join("work"),
        vec![BranchSpec::tracking("main").with_all_history()],
    );
    poller.initialize().await.unwrap();

    assert_eq!(poller.poll().await.unwrap(), 2);
    let changes = store.changes_after(None).await.unwrap();
    let revisions: Vec<_> = changes.iter().map(|c| c.revision.clone()).collect();
    assert_eq!(revisions, vec![h0, h1]);
    assert!(changes.iter().all(|c| c.skip_build));
}

#[tokio::test]
async fn local_only_branch_advances_cursor() {
    // The workdir itself is the repository; the tracked branch is moved by
    // an external actor rather than by fetching.
    let wd = tempfile::tempdir().unwrap();
    let workdir = wd.path().join("work");
    std::fs::create_dir_all(&workdir).unwrap();
    run_git(&workdir, &["init", "-b", "main"]);
    run_git(&workdir, &["config", "user.name", "test-user"]);
    run_git(&workdir, &["config", "user.email", "test@example.com"]);
    let h0 = commit_file(&workdir, "README.md", "initial");

    let store = Arc::new(MemoryChangeStore::new());
    let mut config = PollerConfig::new("local://imports", workdir.clone());
    config.poller_name = Some("imports".to_string());
    config.branches = vec![BranchSpec::local_only("incoming", h0.clone())];
    let poller = GitPoller::new(config, store.clone()).unwrap();
    poller.initialize().await.unwrap();

    let h1 = commit_file(&workdir, "a.txt", "imported one");
    let h2 = commit_file(&workdir, "b.txt", "imported two");
    run_git(&workdir, &["branch", "-f", "incoming", &h2]);

    assert_eq!(poller.poll().await.unwrap(), 2);
    let changes = store.changes_after(None).await.unwrap();
    let revisions: Vec<_> = changes.iter().map(|c| c.revision.clone()).collect();
    assert_eq!(revisions, vec![h1, h2.clone()]);
    assert!(changes.iter().all(|c| c.branch == "incoming"));

    // The cursor is the only memory of progress, and it now sits at h2.
    assert_eq!(
        store.branch_cursor("imports", "incoming").await.unwrap(),
        Some(h2)
    );
    assert_eq!(poller.poll().await.unwrap(), 0);
}

#[tokio::test]
async fn rewritten_remote_history_resynchronizes_without_emitting() {
    let (remote, _h0) = make_remote();
    let wd = tempfile::tempdir().unwrap();
    let workdir = wd.path().join("work");
    let (poller, store) = poller_for(
        remote.path(),
        workdir.clone(),
        vec![BranchSpec::tracking("main")],
    );
    poller.initialize().await.unwrap();

    let h1 = commit_file(remote.path(), "a.txt", "will be rewritten");
    assert_eq!(poller.poll().await.unwrap(), 1);

    // Force-rewrite the remote: drop h1, add a divergent commit.
    run_git(remote.path(), &["reset", "--hard", "HEAD~1"]);
    let h2 = commit_file(remote.path(), "b.txt", "rewritten tip");
    assert_ne!(h1, h2);

    // The poller resynchronizes the tracking ref instead of emitting.
    assert_eq!(poller.poll().await.unwrap(), 0);
    assert_eq!(store.changes_after(None).await.unwrap().len(), 1);

    let git = GitClient::new("git", &workdir);
    assert_eq!(git.rev_parse("main").await.unwrap(), h2);

    // Back to steady state afterwards.
    let h3 = commit_file(remote.path(), "c.txt", "after rewrite");
    assert_eq!(poller.poll().await.unwrap(), 1);
    let changes = store.changes_after(None).await.unwrap();
    assert_eq!(changes.last().unwrap().revision, h3);
}
