//! Interval-driven service wrapper around a poller.
//!
//! Each poller runs its cycles independently on its own timer; coordination
//! with schedulers happens only through the change store. A cycle already in
//! flight when shutdown is signalled finishes its current step before the
//! task exits.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{error, info};

use crate::error::PollerResult;
use crate::poller::GitPoller;

/// Handle to a running poller task.
pub struct PollerService {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PollerService {
    /// Initialize the poller and start its polling loop.
    ///
    /// Initialization failures are fatal: the error is returned and no task
    /// is spawned. Steady-state poll failures are logged and the loop
    /// continues on its next tick.
    pub async fn start(poller: Arc<GitPoller>) -> PollerResult<Self> {
        poller.initialize().await?;

        let interval = poller.config().poll_interval();
        let repo = poller.config().repo_url.clone();
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!(repo = %repo, ?interval, "poller service started");
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match poller.poll().await {
                            Ok(0) => {}
                            Ok(count) => info!(repo = %repo, count, "poll cycle submitted changes"),
                            Err(e) => error!(repo = %repo, error = %e, "poll cycle failed"),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!(repo = %repo, "poller service stopping");
                            break;
                        }
                    }
                }
            }
        });

        Ok(PollerService { shutdown, handle })
    }

    /// Signal shutdown and wait for the loop to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}
