//! Bosun daemon: wires configured pollers and schedulers over one shared
//! change store and runs them until interrupted.

mod config;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};

use bosun_poller::{GitPoller, PollerService};
use bosun_scheduler::{Scheduler, SchedulerService};
use bosun_store::MemoryChangeStore;

use crate::config::DaemonConfig;

#[derive(Debug, Parser)]
#[command(name = "bosund", version, about = "Bosun change detection and build scheduling daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "BOSUND_CONFIG", default_value = "bosund.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = DaemonConfig::load(&args.config)?;

    let level = config.log_level.parse().unwrap_or(Level::INFO);
    telemetry::init_tracing(config.log_json, level);
    info!(config = %args.config.display(), "bosund starting");

    // In-memory store; a persistent backend plugs in behind the same traits.
    let store = Arc::new(MemoryChangeStore::new());

    let mut pollers = Vec::new();
    for poller_config in config.pollers {
        let repo = poller_config.repo_url.clone();
        let poller = Arc::new(
            GitPoller::new(poller_config, store.clone())
                .with_context(|| format!("configuring poller for {repo}"))?,
        );
        let service = PollerService::start(poller)
            .await
            .with_context(|| format!("starting poller for {repo}"))?;
        pollers.push(service);
    }

    let check_interval = Duration::from_secs(config.check_interval_secs);
    let mut schedulers = Vec::new();
    for scheduler_config in config.schedulers {
        let name = scheduler_config.name.clone();
        let scheduler = Arc::new(
            Scheduler::new(scheduler_config, store.clone())
                .with_context(|| format!("configuring scheduler {name}"))?,
        );
        let service = SchedulerService::start(scheduler, check_interval)
            .await
            .with_context(|| format!("starting scheduler {name}"))?;
        schedulers.push(service);
    }

    info!(
        pollers = pollers.len(),
        schedulers = schedulers.len(),
        "bosund running"
    );
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    info!("bosund shutting down");
    for service in pollers {
        service.stop().await;
    }
    for service in schedulers {
        service.stop().await;
    }
    Ok(())
}
