//! Core data model for the change store.
//!
//! A `Change` is one immutable commit-derived event submitted by a poller.
//! A `SourceStamp` pins the exact set of changes a buildset will build, and
//! a `Buildset` is one triggered build request referencing a stamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned, monotonically increasing change identifier.
///
/// Ordering by `ChangeNumber` is the canonical ordering used when building
/// sourcestamps and retiring changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChangeNumber(pub u64);

impl std::fmt::Display for ChangeNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-assigned sourcestamp identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceStampId(pub u64);

impl std::fmt::Display for SourceStampId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-assigned buildset identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BuildsetId(pub u64);

impl std::fmt::Display for BuildsetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one scheduler instance within the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchedulerId(pub String);

impl SchedulerId {
    pub fn new(name: impl Into<String>) -> Self {
        SchedulerId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SchedulerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a poller submits to the store: one commit reaching a tracked branch.
///
/// The store assigns a `ChangeNumber` on append and hands back the full
/// [`Change`]; entries themselves carry no identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Commit author identity (typically the author email).
    pub author: String,

    /// Opaque commit identifier (git SHA).
    pub revision: String,

    /// Repository-relative paths touched by the commit, sorted.
    pub files: Vec<String>,

    /// Commit subject plus body.
    pub comments: String,

    /// Commit timestamp, UTC.
    pub when: DateTime<Utc>,

    /// Logical branch name as seen by downstream consumers.
    pub branch: String,

    /// Scheduler category filter key.
    pub category: Option<String>,

    /// Project name.
    pub project: String,

    /// Origin repository URL.
    pub repository: String,

    /// True when the change was produced by historic backfill and must not
    /// itself trigger a build.
    pub skip_build: bool,
}

impl ChangeEntry {
    /// Normalize the entry: files sorted for stable display and comparison.
    pub fn normalized(mut self) -> Self {
        self.files.sort();
        self
    }
}

/// An immutable record of one commit reaching a tracked branch.
///
/// Created by a poller, never mutated, retired (marked consumed, never
/// deleted) by a scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Store-assigned ordering identity.
    pub number: ChangeNumber,

    pub author: String,
    pub revision: String,
    pub files: Vec<String>,
    pub comments: String,
    pub when: DateTime<Utc>,
    pub branch: String,
    pub category: Option<String>,
    pub project: String,
    pub repository: String,
    pub skip_build: bool,
}

impl Change {
    /// Build a `Change` from an entry plus its assigned number.
    pub fn from_entry(number: ChangeNumber, entry: ChangeEntry) -> Self {
        let entry = entry.normalized();
        Change {
            number,
            author: entry.author,
            revision: entry.revision,
            files: entry.files,
            comments: entry.comments,
            when: entry.when,
            branch: entry.branch,
            category: entry.category,
            project: entry.project,
            repository: entry.repository,
            skip_build: entry.skip_build,
        }
    }
}

/// The exact set of changes defining the tree state a buildset will build.
///
/// Changes are listed oldest-first by `ChangeNumber`; the stamp's branch and
/// revision come from the newest change in the list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStamp {
    pub branch: String,
    pub revision: String,
    pub changes: Vec<ChangeNumber>,
}

impl SourceStamp {
    /// Build a stamp from changes already sorted by number.
    ///
    /// Returns `None` for an empty slice; a stamp always pins at least one
    /// change.
    pub fn from_changes(changes: &[Change]) -> Option<Self> {
        let newest = changes.last()?;
        Some(SourceStamp {
            branch: newest.branch.clone(),
            revision: newest.revision.clone(),
            changes: changes.iter().map(|c| c.number).collect(),
        })
    }
}

/// Final disposition of a buildset, reported by the build side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildResult {
    Success,
    Warnings,
    Failure,
    Exception,
}

impl BuildResult {
    /// Success-or-warnings: dependent schedulers re-trigger only on these.
    pub fn is_successful(&self) -> bool {
        matches!(self, BuildResult::Success | BuildResult::Warnings)
    }
}

/// One triggered build request referencing a sourcestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Buildset {
    pub id: BuildsetId,

    /// The stamp this buildset will build.
    pub source_stamp_id: SourceStampId,

    /// Name of the scheduler that created the buildset.
    pub scheduler: String,

    /// Free-form trigger reason ("scheduler", "downstream", ...).
    pub reason: String,

    /// Builder names this buildset fans out to.
    pub builder_names: Vec<String>,

    /// Properties applied to all builds started from this buildset.
    pub properties: serde_json::Value,

    pub complete: bool,
    pub result: Option<BuildResult>,
}

/// One row of a dependent scheduler's subscription view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildsetSubscription {
    pub buildset_id: BuildsetId,
    pub source_stamp_id: SourceStampId,
    pub complete: bool,
    pub result: Option<BuildResult>,
}
