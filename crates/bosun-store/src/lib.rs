//! Bosun change store
//!
//! The coordination surface between source pollers, build schedulers, and
//! the build side: an append-only change log, per-branch position cursors,
//! and buildset bookkeeping with atomic change retirement.
//!
//! The traits in [`storage_traits`] are the contract; [`fakes`] holds the
//! in-memory reference implementation used in tests and as the placeholder
//! backend.

pub mod error;
pub mod fakes;
pub mod model;
pub mod storage_traits;

pub use error::{StoreError, StoreResult};
pub use fakes::MemoryChangeStore;
pub use model::{
    BuildResult, Buildset, BuildsetId, BuildsetSubscription, Change, ChangeEntry, ChangeNumber,
    SchedulerId, SourceStamp, SourceStampId,
};
pub use storage_traits::{ChangeStore, CursorStore, PollerStore, SchedulerStore};
