//! Event- and timer-driven service wrapper around a scheduler.
//!
//! The loop wakes on three edges: a periodic check tick, an external
//! "new changes available" notification, or the wake time the last
//! evaluation asked for. Evaluations of one scheduler never overlap; all
//! coordination with pollers happens through the change store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info};

use crate::error::SchedulerResult;
use crate::scheduler::Scheduler;

/// Handle to a running scheduler task.
pub struct SchedulerService {
    shutdown: watch::Sender<bool>,
    notify: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl SchedulerService {
    /// Initialize the scheduler and start its evaluation loop.
    ///
    /// Initialization failures are fatal: the error is returned and no task
    /// is spawned. Steady-state evaluation failures are logged and the next
    /// tick is the retry.
    pub async fn start(
        scheduler: Arc<Scheduler>,
        check_interval: Duration,
    ) -> SchedulerResult<Self> {
        scheduler.initialize().await?;

        let name = scheduler.name().to_string();
        let notify = Arc::new(Notify::new());
        let task_notify = notify.clone();
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!(scheduler = %name, ?check_interval, "scheduler service started");
            let mut wake: Option<DateTime<Utc>> = None;
            loop {
                let sleep_for = sleep_until(wake, check_interval);
                tokio::select! {
                    _ = time::sleep(sleep_for) => {}
                    _ = task_notify.notified() => {
                        debug!(scheduler = %name, "woken by new-changes notification");
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!(scheduler = %name, "scheduler service stopping");
                            break;
                        }
                        continue;
                    }
                }
                match scheduler.evaluate(Utc::now()).await {
                    Ok(next) => wake = next,
                    Err(e) => {
                        error!(scheduler = %name, error = %e, "evaluation failed");
                        wake = None;
                    }
                }
            }
        });

        Ok(SchedulerService {
            shutdown,
            notify,
            handle,
        })
    }

    /// Handle pollers (or tests) can use to request a prompt evaluation.
    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Signal shutdown and wait for the loop to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

/// Time to sleep before the next evaluation: the requested wake time when
/// one is pending, capped by the periodic check interval.
fn sleep_until(wake: Option<DateTime<Utc>>, check_interval: Duration) -> Duration {
    match wake {
        Some(at) => (at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(check_interval),
        None => check_interval,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn sleep_caps_at_check_interval() {
        let far = Utc::now() + ChronoDuration::seconds(3600);
        let interval = Duration::from_secs(60);
        assert_eq!(sleep_until(Some(far), interval), interval);
    }

    #[test]
    fn past_wake_time_sleeps_zero() {
        let past = Utc::now() - ChronoDuration::seconds(10);
        assert_eq!(sleep_until(Some(past), Duration::from_secs(60)), Duration::ZERO);
    }

    #[test]
    fn no_wake_time_uses_check_interval() {
        let interval = Duration::from_secs(60);
        assert_eq!(sleep_until(None, interval), interval);
    }
}
