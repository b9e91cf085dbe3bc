//! The git source poller.
//!
//! Keeps local tracking refs in sync with a remote repository and emits
//! exactly the commits newly reachable since the last successful poll, once
//! each, oldest-first, as change records in the store.
//!
//! One mutex guards both initialization and the poll cycle, so the two never
//! interleave and at most one cycle is in flight per poller instance.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use bosun_store::{ChangeEntry, PollerStore};

use crate::config::{BranchSpec, PollerConfig};
use crate::error::{PollerError, PollerResult};
use crate::git::GitClient;
use crate::logfmt::{self, RawCommit};

/// Process-local poller state, guarded by the instance lock.
#[derive(Debug)]
struct PollerState {
    /// Effective bare mode; flipped off when the workdir turns out to be a
    /// checkout.
    bare: bool,
    last_poll: Option<DateTime<Utc>>,
    last_change: Option<DateTime<Utc>>,
    /// Changes submitted during the current/most recent cycle.
    change_count: usize,
    /// Local names of branches still awaiting full-history backfill.
    /// Shrinks monotonically to empty.
    pending_backfill: HashSet<String>,
}

/// Point-in-time view of the poller state.
#[derive(Debug, Clone)]
pub struct PollerStatus {
    pub last_poll: Option<DateTime<Utc>>,
    pub last_change: Option<DateTime<Utc>>,
    pub change_count: usize,
    pub pending_backfill: Vec<String>,
}

/// Polls a remote git repository and submits new commits as changes.
pub struct GitPoller {
    config: PollerConfig,
    branches: Vec<BranchSpec>,
    git: GitClient,
    store: Arc<dyn PollerStore>,
    state: Mutex<PollerState>,
}

impl GitPoller {
    /// Validate the configuration and build a poller.
    ///
    /// Configuration errors are fatal here; a misconfigured poller never
    /// starts.
    pub fn new(config: PollerConfig, store: Arc<dyn PollerStore>) -> PollerResult<Self> {
        let branches = config.resolved_branches()?;
        let git = GitClient::new(&config.git_bin, &config.workdir);
        let pending_backfill = branches
            .iter()
            .filter(|b| b.all_history)
            .map(|b| b.local_name.clone())
            .collect();
        let state = PollerState {
            bare: config.bare,
            last_poll: None,
            last_change: None,
            change_count: 0,
            pending_backfill,
        };
        Ok(GitPoller {
            config,
            branches,
            git,
            store,
            state: Mutex::new(state),
        })
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub async fn status(&self) -> PollerStatus {
        let state = self.state.lock().await;
        PollerStatus {
            last_poll: state.last_poll,
            last_change: state.last_change,
            change_count: state.change_count,
            pending_backfill: state.pending_backfill.iter().cloned().collect(),
        }
    }

    /// Idempotent setup: create or reuse the working repository, register
    /// the remote, and create missing local tracking refs.
    ///
    /// Any failure here is fatal to the poller; the caller must not start
    /// polling.
    pub async fn initialize(&self) -> PollerResult<()> {
        let mut state = self.state.lock().await;

        let workdir = self.git.workdir();
        let is_checkout = workdir.join(".git").exists();
        let looks_bare = workdir.join("config").exists() && workdir.join("objects").is_dir();
        if is_checkout {
            if state.bare {
                warn!(workdir = %workdir.display(), "workdir is a checkout, switching off bare mode");
                state.bare = false;
            }
            info!(workdir = %workdir.display(), "reusing existing working repository");
        } else if state.bare && looks_bare {
            info!(workdir = %workdir.display(), "reusing existing bare repository");
        } else {
            if let Some(parent) = workdir.parent() {
                std::fs::create_dir_all(parent)?;
            }
            info!(repo = %self.config.repo_url, workdir = %workdir.display(), "initializing working repository");
            self.git.init(state.bare).await?;
        }

        let remotes = self.git.remotes().await?;
        if !remotes.iter().any(|r| r == &self.config.remote_name) {
            self.git
                .remote_add(&self.config.remote_name, &self.config.repo_url)
                .await?;
        }
        if self.branches.iter().any(|b| !b.is_local_only()) {
            self.git
                .fetch(&self.config.remote_name, self.config.fetch_refspec.as_deref())
                .await?;
        }

        let existing = self.git.local_branches().await?;
        for spec in &self.branches {
            if existing.contains(&spec.local_name) {
                info!(branch = %spec.local_name, "local tracking branch already set up");
                continue;
            }
            match &spec.remote_branch {
                Some(remote) => {
                    let target = format!("{}/{}", self.config.remote_name, remote);
                    if state.bare {
                        self.git.branch_force(&spec.local_name, &target).await?;
                    } else {
                        self.git.checkout_branch(&spec.local_name, &target).await?;
                    }
                }
                None => {
                    let head = self.local_only_head(spec).await?;
                    self.git.branch_force(&spec.local_name, &head).await?;
                    self.store
                        .set_branch_cursor(
                            self.config.cursor_namespace(),
                            &spec.local_name,
                            &head,
                        )
                        .await?;
                }
            }
            info!(branch = %spec.local_name, "created local tracking branch");
        }

        info!(repo = %self.config.repo_url, "finished initializing working repository");
        Ok(())
    }

    /// One synchronization cycle. Returns the number of changes submitted.
    ///
    /// Per-branch external failures are logged and skip only that branch;
    /// the cycle then reports [`PollerError::PollFailed`], but catch-up
    /// still runs for the branches that succeeded. A failed branch keeps
    /// its tracking ref where it was, so the next scheduled poll
    /// re-observes the same range and nothing is lost.
    pub async fn poll(&self) -> PollerResult<usize> {
        let mut state = self.state.lock().await;
        state.last_poll = Some(Utc::now());
        state.change_count = 0;
        info!(repo = %self.config.repo_url, "polling git repository");

        if self.branches.iter().any(|b| !b.is_local_only()) {
            // Without fresh remote refs every incremental range is stale, so
            // a failed fetch aborts the whole cycle.
            self.git
                .fetch(&self.config.remote_name, self.config.fetch_refspec.as_deref())
                .await?;
        }

        let mut cycle_failed = false;
        let mut succeeded: Vec<&BranchSpec> = Vec::new();
        for spec in &self.branches {
            match self.poll_branch(spec, &mut state).await {
                Ok(0) => succeeded.push(spec),
                Ok(count) => {
                    succeeded.push(spec);
                    state.change_count += count;
                    state.last_change = Some(Utc::now());
                }
                Err(e) => {
                    error!(branch = %spec.local_name, error = %e, "branch poll failed");
                    cycle_failed = true;
                }
            }
        }

        if state.change_count > 0 {
            self.catch_up_locked(&succeeded, &state).await;
        } else {
            info!("no changes, no catch-up");
        }

        if cycle_failed {
            Err(PollerError::PollFailed)
        } else {
            Ok(state.change_count)
        }
    }

    /// Advance every local tracking ref to the remote tip it was last
    /// diffed against. Failures are logged only; stale tracking refs are
    /// preferable to halting change detection.
    pub async fn catch_up(&self) {
        let state = self.state.lock().await;
        let specs: Vec<&BranchSpec> = self.branches.iter().collect();
        self.catch_up_locked(&specs, &state).await;
    }

    /// Reset the given branches' tracking refs. Branches that failed their
    /// poll this cycle are excluded by the caller: advancing their refs
    /// would skip past commits that were never emitted.
    async fn catch_up_locked(&self, specs: &[&BranchSpec], state: &PollerState) {
        info!("catching up tracking branches");
        for &spec in specs {
            // Local-only branches are positioned by their cursor, never reset.
            let Some(remote) = &spec.remote_branch else {
                continue;
            };
            let target = format!("{}/{}", self.config.remote_name, remote);
            if let Err(e) = self.reset_tracking_ref(spec, &target, state.bare).await {
                warn!(branch = %spec.local_name, error = %e, "catch-up failed, tracking ref left stale");
            }
        }
    }

    async fn reset_tracking_ref(
        &self,
        spec: &BranchSpec,
        target: &str,
        bare: bool,
    ) -> PollerResult<()> {
        if bare {
            self.git.branch_force(&spec.local_name, target).await
        } else {
            self.git.checkout_force(&spec.local_name).await?;
            self.git.reset_hard(target).await
        }
    }

    async fn local_only_head(&self, spec: &BranchSpec) -> PollerResult<String> {
        let cursor = self
            .store
            .branch_cursor(self.config.cursor_namespace(), &spec.local_name)
            .await?;
        cursor.or_else(|| spec.initial_head.clone()).ok_or_else(|| {
            PollerError::Config(format!(
                "local-only branch {} has no starting revision",
                spec.local_name
            ))
        })
    }

    /// Poll one branch: compute the range, run the log query, and submit
    /// each new commit oldest-first. Returns the number of commits emitted.
    async fn poll_branch(
        &self,
        spec: &BranchSpec,
        state: &mut PollerState,
    ) -> PollerResult<usize> {
        let namespace = self.config.cursor_namespace();
        let mut backfill = false;

        let range = match &spec.remote_branch {
            None => {
                let cursor = self.local_only_head(spec).await?;
                format!("{}..{}", cursor, spec.local_name)
            }
            Some(remote) => {
                let remote_ref = format!("{}/{}", self.config.remote_name, remote);
                if state.pending_backfill.contains(&spec.local_name) {
                    backfill = true;
                    let known: Vec<String> = self
                        .branches
                        .iter()
                        .map(|b| b.local_name.clone())
                        .filter(|name| {
                            name != &spec.local_name && !state.pending_backfill.contains(name)
                        })
                        .collect();
                    if known.is_empty() {
                        // Nothing else is known yet: scan the entire history.
                        remote_ref
                    } else {
                        let base = self.git.merge_base_octopus(&known).await?;
                        format!("{base}..{remote_ref}")
                    }
                } else {
                    if !self.git.is_ancestor(&spec.local_name, &remote_ref).await? {
                        warn!(
                            branch = %spec.local_name,
                            "remote history rewritten, resynchronizing tracking ref without emitting changes"
                        );
                        self.reset_tracking_ref(spec, &remote_ref, state.bare)
                            .await?;
                        return Ok(0);
                    }
                    format!("{}..{}", spec.local_name, remote_ref)
                }
            }
        };

        // The branch counts as known from here on, commits or not, so later
        // merge-base computations may use its tip.
        state.pending_backfill.remove(&spec.local_name);

        let output = self.git.log(&range, &logfmt::log_format()).await?;
        let mut commits = logfmt::parse_log(&output)?;
        if commits.is_empty() {
            return Ok(0);
        }

        // The log query returns newest-first; emit oldest-first so downstream
        // ordering matches causal order.
        commits.reverse();
        info!(branch = %spec.local_name, count = commits.len(), backfill, "processing changes");

        let mut newest = None;
        for commit in &commits {
            self.store
                .add_change(self.to_entry(spec, commit, backfill))
                .await?;
            newest = Some(commit.hash.clone());
        }

        if spec.is_local_only() {
            if let Some(hash) = newest {
                // The cursor is the only memory of local-only progress; the
                // next poll's range starts exactly here.
                self.store
                    .set_branch_cursor(namespace, &spec.local_name, &hash)
                    .await?;
            }
        }

        Ok(commits.len())
    }

    fn to_entry(&self, spec: &BranchSpec, commit: &RawCommit, backfill: bool) -> ChangeEntry {
        let when = Utc
            .timestamp_opt(commit.timestamp, 0)
            .single()
            .unwrap_or_else(Utc::now);
        ChangeEntry {
            author: commit.author.clone(),
            revision: commit.hash.clone(),
            files: commit.files.clone(),
            comments: commit.comments(),
            when,
            branch: spec
                .remote_branch
                .clone()
                .unwrap_or_else(|| spec.local_name.clone()),
            category: self.config.category.clone(),
            project: self.config.project.clone(),
            repository: self.config.repo_url.clone(),
            skip_build: backfill,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bosun_store::{CursorStore, MemoryChangeStore};

    fn store() -> Arc<MemoryChangeStore> {
        Arc::new(MemoryChangeStore::new())
    }

    #[test]
    fn construction_rejects_bad_config() {
        let config = PollerConfig::new("url", "/tmp/wd");
        let err = GitPoller::new(config, store()).err();
        assert!(matches!(err, Some(PollerError::Config(_))));
    }

    #[tokio::test]
    async fn backfill_branches_start_pending() {
        let mut config = PollerConfig::new("url", "/tmp/wd");
        config.branches = vec![
            BranchSpec::tracking("main"),
            BranchSpec::tracking("release").with_all_history(),
        ];
        let poller = GitPoller::new(config, store()).unwrap();
        let status = poller.status().await;
        assert_eq!(status.pending_backfill, vec!["release".to_string()]);
        assert_eq!(status.change_count, 0);
    }

    #[tokio::test]
    async fn local_only_head_prefers_stored_cursor() {
        let mut config = PollerConfig::new("url", "/tmp/wd");
        config.poller_name = Some("p1".to_string());
        config.branches = vec![BranchSpec::local_only("feature", "h0")];
        let store = store();
        let poller = GitPoller::new(config, store.clone()).unwrap();

        let spec = poller.branches[0].clone();
        assert_eq!(poller.local_only_head(&spec).await.unwrap(), "h0");

        store.set_branch_cursor("p1", "feature", "h5").await.unwrap();
        assert_eq!(poller.local_only_head(&spec).await.unwrap(), "h5");
    }

    #[tokio::test]
    async fn local_only_without_head_is_a_config_error() {
        let mut config = PollerConfig::new("url", "/tmp/wd");
        config.branches = vec![BranchSpec {
            remote_branch: None,
            local_name: "feature".to_string(),
            initial_head: None,
            all_history: false,
        }];
        let poller = GitPoller::new(config, store()).unwrap();
        let spec = poller.branches[0].clone();
        let err = poller.local_only_head(&spec).await.unwrap_err();
        assert!(matches!(err, PollerError::Config(_)));
    }
}
