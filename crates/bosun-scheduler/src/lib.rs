//! Build schedulers: turn a backlog of per-branch changes into buildsets
//! while debouncing bursts of commits, never dropping or double-counting a
//! change:
//! - change filtering and caller-supplied importance classification
//! - debounce (tree-stable-timer) core with sliding windows
//! - per-branch fanning and upstream-buildset (dependent) triggering
//! - atomic buildset creation with change retirement through the store

pub mod error;
pub mod filter;
pub mod scheduler;
pub mod service;

pub use error::{SchedulerError, SchedulerResult};
pub use filter::{ChangeFilter, ImportancePredicate};
pub use scheduler::{Scheduler, SchedulerConfig, TriggerInput};
pub use service::SchedulerService;
