//! Storage trait definitions for the Bosun change store.
//!
//! These traits define the coordination surface between pollers, schedulers,
//! and the build side:
//! - `ChangeStore`: append-only change log with store-assigned numbering
//! - `CursorStore`: per-(poller, branch) position cursors
//! - `SchedulerStore`: classified change views, atomic buildset creation
//!   with change retirement, and buildset subscriptions
//!
//! All traits are async and backend-agnostic. An in-memory reference
//! implementation is provided for testing via the `fakes` module. The store
//! is the only mutable resource shared between components; every
//! cross-component handoff goes through these operations.

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::model::{
    BuildResult, Buildset, BuildsetId, BuildsetSubscription, Change, ChangeEntry, ChangeNumber,
    SchedulerId, SourceStamp, SourceStampId,
};

/// Append-only change log.
///
/// Guarantees:
/// - `add_change` assigns strictly increasing `ChangeNumber`s.
/// - Stored changes are immutable; retirement never deletes them.
#[async_trait]
pub trait ChangeStore: Send + Sync {
    /// Append a change and return its assigned number.
    async fn add_change(&self, entry: ChangeEntry) -> StoreResult<ChangeNumber>;

    /// Retrieve a change by number.
    async fn get_change(&self, number: ChangeNumber) -> StoreResult<Change>;

    /// All changes numbered strictly after `after` (all changes when `None`),
    /// ordered by number.
    async fn changes_after(&self, after: Option<ChangeNumber>) -> StoreResult<Vec<Change>>;

    /// Highest assigned change number, if any change exists.
    async fn latest_change_number(&self) -> StoreResult<Option<ChangeNumber>>;
}

/// Per-(poller, branch) position cursors.
///
/// A cursor records the last revision a poller has fully processed for a
/// branch whose position is supplied externally rather than fetched. It is
/// runtime state owned by the poller but persisted through the store, so a
/// restarted poller resumes exactly where it left off.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Last processed revision for the branch, if one was ever recorded.
    async fn branch_cursor(&self, poller: &str, branch: &str) -> StoreResult<Option<String>>;

    /// Advance the branch cursor to `revision`.
    async fn set_branch_cursor(&self, poller: &str, branch: &str, revision: &str)
        -> StoreResult<()>;
}

/// Everything a poller needs from the store.
pub trait PollerStore: ChangeStore + CursorStore {}

impl<T: ChangeStore + CursorStore> PollerStore for T {}

/// Scheduler-facing store operations. Classification reads the change log,
/// so every scheduler store is also a [`ChangeStore`].
///
/// Guarantees:
/// - `create_buildset` creates the sourcestamp and buildset and retires the
///   listed changes as one atomic step; a crash observes either none or all
///   of it. Re-running a scheduler's decision against already-committed
///   state is therefore a no-op (the classified view comes back empty).
/// - Retirement is idempotent: retiring an already-retired change does
///   nothing.
/// - Subscriptions are consumed exactly once via `unsubscribe_buildset`.
#[async_trait]
pub trait SchedulerStore: ChangeStore {
    /// High-water mark of changes this scheduler has classified.
    async fn scheduler_last_processed(
        &self,
        id: &SchedulerId,
    ) -> StoreResult<Option<ChangeNumber>>;

    /// Advance the classification high-water mark.
    async fn set_scheduler_last_processed(
        &self,
        id: &SchedulerId,
        number: ChangeNumber,
    ) -> StoreResult<()>;

    /// Record an importance classification for one change.
    async fn classify_change(
        &self,
        id: &SchedulerId,
        number: ChangeNumber,
        important: bool,
    ) -> StoreResult<()>;

    /// Classified, not-yet-retired changes, as `(important, unimportant)`,
    /// each list ordered by change number.
    async fn classified_changes(
        &self,
        id: &SchedulerId,
    ) -> StoreResult<(Vec<Change>, Vec<Change>)>;

    /// Drop changes from the scheduler's pending set. Idempotent.
    async fn retire_changes(&self, id: &SchedulerId, numbers: &[ChangeNumber]) -> StoreResult<()>;

    /// Atomically create a sourcestamp + buildset and retire `retire` from
    /// the scheduler's pending set. Any scheduler watching this scheduler's
    /// name is subscribed to the new buildset before the call returns.
    async fn create_buildset(
        &self,
        id: &SchedulerId,
        stamp: SourceStamp,
        reason: &str,
        builder_names: &[String],
        retire: &[ChangeNumber],
    ) -> StoreResult<BuildsetId>;

    /// Create a buildset against an existing sourcestamp (dependent
    /// re-trigger). Watchers of this scheduler are subscribed as above.
    async fn create_buildset_for_stamp(
        &self,
        id: &SchedulerId,
        stamp_id: SourceStampId,
        reason: &str,
        builder_names: &[String],
    ) -> StoreResult<BuildsetId>;

    /// Retrieve a buildset by id.
    async fn get_buildset(&self, id: BuildsetId) -> StoreResult<Buildset>;

    /// Retrieve a sourcestamp by id.
    async fn get_source_stamp(&self, id: SourceStampId) -> StoreResult<SourceStamp>;

    /// Register interest in buildsets created by `upstream_name`: every
    /// future buildset that scheduler creates is auto-subscribed for `id`.
    async fn watch_upstream(&self, id: &SchedulerId, upstream_name: &str) -> StoreResult<()>;

    /// Subscribe to one specific buildset.
    async fn subscribe_to_buildset(&self, id: &SchedulerId, bsid: BuildsetId) -> StoreResult<()>;

    /// Current subscriptions with completion state, ordered by buildset id.
    async fn subscribed_buildsets(
        &self,
        id: &SchedulerId,
    ) -> StoreResult<Vec<BuildsetSubscription>>;

    /// Drop one subscription. Idempotent.
    async fn unsubscribe_buildset(&self, id: &SchedulerId, bsid: BuildsetId) -> StoreResult<()>;

    /// Mark a buildset complete with its result (build side / tests).
    async fn complete_buildset(&self, bsid: BuildsetId, result: BuildResult) -> StoreResult<()>;
}
