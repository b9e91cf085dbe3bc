//! Error types for bosun-store.

use thiserror::Error;

/// Errors produced by the change store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A referenced change number does not exist.
    #[error("change not found: {number}")]
    ChangeNotFound { number: u64 },

    /// A referenced buildset does not exist.
    #[error("buildset not found: {id}")]
    BuildsetNotFound { id: u64 },

    /// A referenced sourcestamp does not exist.
    #[error("sourcestamp not found: {id}")]
    StampNotFound { id: u64 },

    /// A sourcestamp must pin at least one change.
    #[error("refusing to create a buildset from an empty sourcestamp")]
    EmptyStamp,

    /// Backend / persistence layer failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Convenience result alias.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
