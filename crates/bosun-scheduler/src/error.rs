//! Scheduler error taxonomy.

use thiserror::Error;

use bosun_store::StoreError;

/// Errors produced by scheduler construction and evaluation.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Invalid scheduler configuration. Fatal at construction, never
    /// retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// The store rejected an operation. Surfaced to the caller; the next
    /// scheduled evaluation is the retry mechanism.
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_displays_message() {
        let err = SchedulerError::Config("no builders configured".to_string());
        assert_eq!(
            err.to_string(),
            "configuration error: no builders configured"
        );
    }

    #[test]
    fn store_error_passes_through() {
        let err = SchedulerError::from(StoreError::BuildsetNotFound { id: 7 });
        assert!(err.to_string().contains("7"));
    }
}
