//! Error types for bosun-poller.

use thiserror::Error;

/// Errors produced by the source poller.
#[derive(Debug, Error)]
pub enum PollerError {
    /// Invalid poller configuration. Fatal at construction time, never
    /// retried.
    #[error("poller configuration error: {0}")]
    Config(String),

    /// A git invocation exited non-zero.
    #[error("git {args:?} exited with code {code}: {stderr}")]
    Git {
        args: Vec<String>,
        code: i32,
        stderr: String,
    },

    /// Workdir creation or git spawn failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Log output violated the sentinel wire format.
    #[error("log protocol error: {0}")]
    Protocol(String),

    /// One or more branches failed during a poll cycle. Per-branch errors
    /// are logged; the next scheduled poll is the retry mechanism.
    #[error("poll cycle failed for one or more branches")]
    PollFailed,

    /// Bubbled-up change store error.
    #[error("store error: {0}")]
    Store(#[from] bosun_store::StoreError),
}

/// Convenience result alias.
pub type PollerResult<T> = std::result::Result<T, PollerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_error_displays_args_and_stderr() {
        let err = PollerError::Git {
            args: vec!["fetch".to_string(), "origin".to_string()],
            code: 128,
            stderr: "fatal: not a git repository".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("fetch"));
        assert!(msg.contains("128"));
        assert!(msg.contains("not a git repository"));
    }

    #[test]
    fn config_error_displays_detail() {
        let err = PollerError::Config("duplicate local branch name: main".to_string());
        assert!(err.to_string().contains("duplicate local branch name"));
    }
}
