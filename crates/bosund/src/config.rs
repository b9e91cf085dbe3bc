//! Daemon configuration: one TOML file describing pollers and schedulers.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use bosun_poller::PollerConfig;
use bosun_scheduler::SchedulerConfig;

fn default_log_level() -> String {
    "info".to_string()
}

fn default_check_interval_secs() -> u64 {
    60
}

/// Top-level daemon configuration.
#[derive(Debug, Deserialize)]
pub struct DaemonConfig {
    /// Emit JSON log lines instead of human-readable ones.
    #[serde(default)]
    pub log_json: bool,

    /// Fallback log level when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Periodic scheduler check interval, independent of debounce wakes.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    #[serde(default)]
    pub pollers: Vec<PollerConfig>,

    #[serde(default)]
    pub schedulers: Vec<SchedulerConfig>,
}

impl DaemonConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }
}
