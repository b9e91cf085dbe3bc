//! Poller configuration and branch specs.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PollerError, PollerResult};

/// Configured mapping from a remote branch to a local tracking name.
///
/// A spec with no `remote_branch` is "local-only": the branch is advanced by
/// an externally supplied position (seeded from `initial_head`, then tracked
/// as a store-persisted cursor) instead of by fetching from the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSpec {
    /// Branch name on the remote; `None` marks a local-only spec.
    pub remote_branch: Option<String>,

    /// Local tracking ref name. Unique within one poller.
    pub local_name: String,

    /// Starting revision for a local-only spec with no persisted cursor.
    #[serde(default)]
    pub initial_head: Option<String>,

    /// Request a one-time full-history backfill before steady-state polling.
    /// Backfilled changes are submitted with `skip_build` set.
    #[serde(default)]
    pub all_history: bool,
}

impl BranchSpec {
    /// Ordinary spec tracking `branch` on the remote under the same name.
    pub fn tracking(branch: impl Into<String>) -> Self {
        let branch = branch.into();
        BranchSpec {
            remote_branch: Some(branch.clone()),
            local_name: branch,
            initial_head: None,
            all_history: false,
        }
    }

    /// Spec tracking a remote branch under a different local name.
    pub fn tracking_as(remote: impl Into<String>, local: impl Into<String>) -> Self {
        BranchSpec {
            remote_branch: Some(remote.into()),
            local_name: local.into(),
            initial_head: None,
            all_history: false,
        }
    }

    /// Local-only spec starting at `head`.
    pub fn local_only(local: impl Into<String>, head: impl Into<String>) -> Self {
        BranchSpec {
            remote_branch: None,
            local_name: local.into(),
            initial_head: Some(head.into()),
            all_history: false,
        }
    }

    /// Enable historic backfill for this spec.
    pub fn with_all_history(mut self) -> Self {
        self.all_history = true;
        self
    }

    pub fn is_local_only(&self) -> bool {
        self.remote_branch.is_none()
    }
}

fn default_remote_name() -> String {
    "origin".to_string()
}

fn default_git_bin() -> String {
    "git".to_string()
}

fn default_poll_interval_secs() -> u64 {
    600
}

/// Full poller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Remote repository URL, recorded on every change.
    pub repo_url: String,

    /// Local working repository path.
    pub workdir: PathBuf,

    /// Cursor namespace in the store. Defaults to the repo URL.
    #[serde(default)]
    pub poller_name: Option<String>,

    /// Single-branch convenience; mutually exclusive with `branches`.
    #[serde(default)]
    pub branch: Option<String>,

    /// Multi-branch specs.
    #[serde(default)]
    pub branches: Vec<BranchSpec>,

    /// Keep the working repository bare (no checkout).
    #[serde(default)]
    pub bare: bool,

    #[serde(default = "default_remote_name")]
    pub remote_name: String,

    #[serde(default = "default_git_bin")]
    pub git_bin: String,

    /// Extra refspec passed to `git fetch`.
    #[serde(default)]
    pub fetch_refspec: Option<String>,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Category recorded on every change.
    #[serde(default)]
    pub category: Option<String>,

    /// Project recorded on every change.
    #[serde(default)]
    pub project: String,
}

impl PollerConfig {
    pub fn new(repo_url: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        PollerConfig {
            repo_url: repo_url.into(),
            workdir: workdir.into(),
            poller_name: None,
            branch: None,
            branches: Vec::new(),
            bare: false,
            remote_name: default_remote_name(),
            git_bin: default_git_bin(),
            fetch_refspec: None,
            poll_interval_secs: default_poll_interval_secs(),
            category: None,
            project: String::new(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Cursor namespace for this poller.
    pub fn cursor_namespace(&self) -> &str {
        self.poller_name.as_deref().unwrap_or(&self.repo_url)
    }

    /// Validate and normalize into the effective branch spec list.
    ///
    /// Configuration errors here are fatal: the poller must not start.
    pub fn resolved_branches(&self) -> PollerResult<Vec<BranchSpec>> {
        let specs = match (&self.branch, self.branches.is_empty()) {
            (Some(_), false) => {
                return Err(PollerError::Config(
                    "set either `branch` or `branches`, not both".to_string(),
                ))
            }
            (Some(branch), true) => vec![BranchSpec::tracking(branch.clone())],
            (None, false) => self.branches.clone(),
            (None, true) => {
                return Err(PollerError::Config(
                    "no branches configured".to_string(),
                ))
            }
        };

        let mut seen = std::collections::HashSet::new();
        for spec in &specs {
            if spec.local_name.is_empty() {
                return Err(PollerError::Config("empty local branch name".to_string()));
            }
            if !seen.insert(spec.local_name.as_str()) {
                return Err(PollerError::Config(format!(
                    "duplicate local branch name: {}",
                    spec.local_name
                )));
            }
            if spec.is_local_only() && spec.all_history {
                return Err(PollerError::Config(format!(
                    "branch {} is local-only and cannot request full history",
                    spec.local_name
                )));
            }
        }
        Ok(specs)
    }
}
