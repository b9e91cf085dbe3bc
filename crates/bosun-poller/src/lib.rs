//! Bosun source poller
//!
//! Watches remote git repositories for new work and converts raw repository
//! history into a normalized stream of change records:
//! - multi-branch tracking with per-branch local tracking refs
//! - optional one-time full-history backfill scoped by octopus merge-base
//! - local-only branches advanced by a store-persisted position cursor
//! - crash-safe catch-up of tracking refs after submission

pub mod config;
pub mod error;
pub mod git;
pub mod logfmt;
pub mod poller;
pub mod service;

pub use config::{BranchSpec, PollerConfig};
pub use error::{PollerError, PollerResult};
pub use git::GitClient;
pub use logfmt::{log_format, parse_log, RawCommit};
pub use poller::{GitPoller, PollerStatus};
pub use service::PollerService;
