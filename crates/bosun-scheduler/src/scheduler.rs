//! The scheduler decision engine.
//!
//! One engine serves the whole scheduler family; variants differ only in
//! their trigger input:
//! - `Changes`: react to classified changes, optionally fanned per branch
//! - `UpstreamBuildsets`: react to completed buildsets of another scheduler
//!
//! The debounce/trigger core is shared. All coordination with pollers and
//! the build side goes through the store; buildset creation and change
//! retirement commit as one store operation, so re-running an evaluation
//! against already-committed state is a no-op.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use bosun_store::{Change, SchedulerId, SchedulerStore, SourceStamp};

use crate::error::{SchedulerError, SchedulerResult};
use crate::filter::{ChangeFilter, ImportancePredicate};

/// What drives a scheduler's evaluations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerInput {
    /// Classified changes from the store, one debounce state machine per
    /// branch when `fan_per_branch` is set.
    Changes {
        #[serde(default)]
        fan_per_branch: bool,
    },

    /// Completed buildsets of the named upstream scheduler.
    UpstreamBuildsets { upstream: String },
}

impl Default for TriggerInput {
    fn default() -> Self {
        TriggerInput::Changes {
            fan_per_branch: false,
        }
    }
}

/// Scheduler configuration. The importance predicate is attached separately
/// via [`Scheduler::with_importance`] since it is code, not data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Scheduler identity within the store.
    pub name: String,

    /// Builders every created buildset fans out to.
    pub builder_names: Vec<String>,

    /// Debounce window in seconds; unset means every important change is
    /// built individually.
    #[serde(default)]
    pub tree_stable_timer_secs: Option<u64>,

    /// Which changes this scheduler looks at.
    #[serde(default)]
    pub filter: ChangeFilter,

    #[serde(default)]
    pub input: TriggerInput,
}

impl SchedulerConfig {
    pub fn new(name: impl Into<String>, builder_names: Vec<String>) -> Self {
        SchedulerConfig {
            name: name.into(),
            builder_names,
            tree_stable_timer_secs: None,
            filter: ChangeFilter::any(),
            input: TriggerInput::default(),
        }
    }
}

/// Per-branch debounce positions. Guarded by the instance lock.
#[derive(Debug, Default)]
struct EngineState {
    /// Branch key -> earliest time the debounce window closes.
    stable_at: HashMap<String, DateTime<Utc>>,
}

/// A build scheduler: turns a backlog of changes (or upstream completions)
/// into buildsets, never dropping or double-counting a change.
pub struct Scheduler {
    id: SchedulerId,
    config: SchedulerConfig,
    predicate: Option<ImportancePredicate>,
    store: Arc<dyn SchedulerStore>,
    state: Mutex<EngineState>,
}

impl Scheduler {
    /// Validate the configuration and build a scheduler.
    ///
    /// Configuration errors are fatal here; a misconfigured scheduler never
    /// starts.
    pub fn new(config: SchedulerConfig, store: Arc<dyn SchedulerStore>) -> SchedulerResult<Self> {
        if config.name.is_empty() {
            return Err(SchedulerError::Config("empty scheduler name".to_string()));
        }
        if config.builder_names.is_empty() {
            return Err(SchedulerError::Config(format!(
                "scheduler {} has no builders",
                config.name
            )));
        }
        if let TriggerInput::UpstreamBuildsets { .. } = &config.input {
            if !config.filter.is_empty() {
                return Err(SchedulerError::Config(format!(
                    "scheduler {} is upstream-triggered and cannot filter changes",
                    config.name
                )));
            }
            if config.tree_stable_timer_secs.is_some() {
                return Err(SchedulerError::Config(format!(
                    "scheduler {} is upstream-triggered and cannot debounce",
                    config.name
                )));
            }
        }
        Ok(Scheduler {
            id: SchedulerId::new(config.name.clone()),
            config,
            predicate: None,
            store,
            state: Mutex::new(EngineState::default()),
        })
    }

    /// Attach the importance predicate. Without one, every matched change is
    /// important.
    pub fn with_importance(mut self, predicate: ImportancePredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn id(&self) -> &SchedulerId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    fn tree_stable_timer(&self) -> Option<Duration> {
        self.config
            .tree_stable_timer_secs
            .map(|secs| Duration::seconds(secs as i64))
    }

    /// One-time setup: register upstream interest for dependent schedulers.
    pub async fn initialize(&self) -> SchedulerResult<()> {
        if let TriggerInput::UpstreamBuildsets { upstream } = &self.config.input {
            self.store.watch_upstream(&self.id, upstream).await?;
            info!(scheduler = %self.id, %upstream, "watching upstream scheduler");
        }
        Ok(())
    }

    /// One evaluation at wall-clock time `now`. Returns the earliest time a
    /// re-evaluation is wanted, or `None` when nothing is pending.
    ///
    /// Evaluations of one instance are serialized; `now` is explicit so the
    /// debounce logic is testable without sleeping.
    pub async fn evaluate(&self, now: DateTime<Utc>) -> SchedulerResult<Option<DateTime<Utc>>> {
        let mut state = self.state.lock().await;
        match &self.config.input {
            TriggerInput::Changes { fan_per_branch } => {
                self.classify_new_changes().await?;
                let (important, unimportant) = self.store.classified_changes(&self.id).await?;
                let groups = group_by_branch(important, unimportant, *fan_per_branch);

                let mut wake: Option<DateTime<Utc>> = None;
                for (key, (important, unimportant)) in groups {
                    let next = self
                        .decide_and_retire(&key, important, unimportant, now, &mut state)
                        .await?;
                    wake = match (wake, next) {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        (a, b) => a.or(b),
                    };
                }
                Ok(wake)
            }
            TriggerInput::UpstreamBuildsets { .. } => {
                self.consume_upstream_completions().await?;
                Ok(None)
            }
        }
    }

    /// Debounce positions currently armed, earliest first.
    pub async fn pending_build_times(&self) -> Vec<DateTime<Utc>> {
        let state = self.state.lock().await;
        let mut times: Vec<DateTime<Utc>> = state.stable_at.values().copied().collect();
        times.sort();
        times
    }

    /// Classify every change past the high-water mark and advance it.
    ///
    /// Backfill changes are classified unimportant regardless of the
    /// predicate: they must never trigger a build on their own.
    async fn classify_new_changes(&self) -> SchedulerResult<()> {
        let last = self.store.scheduler_last_processed(&self.id).await?;
        let changes = self.store.changes_after(last).await?;
        let mut latest = None;
        for change in &changes {
            if self.config.filter.matches(change) {
                let important = !change.skip_build
                    && self.predicate.as_ref().map_or(true, |p| (**p)(change));
                self.store
                    .classify_change(&self.id, change.number, important)
                    .await?;
                debug!(scheduler = %self.id, change = %change.number, important, "classified change");
            }
            latest = Some(change.number);
        }
        if let Some(number) = latest {
            self.store
                .set_scheduler_last_processed(&self.id, number)
                .await?;
        }
        Ok(())
    }

    /// The debounce core for one branch group.
    ///
    /// With a window: arm or slide `stable_at` from the latest important
    /// change; once `now` passes it, build the ordered union of important
    /// and unimportant changes as one buildset and retire all of them.
    /// Without a window: every important change gets its own buildset;
    /// unimportant changes are retired but never built.
    async fn decide_and_retire(
        &self,
        key: &str,
        important: Vec<Change>,
        unimportant: Vec<Change>,
        now: DateTime<Utc>,
        state: &mut EngineState,
    ) -> SchedulerResult<Option<DateTime<Utc>>> {
        if important.is_empty() {
            // An unimportant-only backlog never arms and never triggers; it
            // rides along with the next important change.
            state.stable_at.remove(key);
            return Ok(None);
        }

        let Some(window) = self.tree_stable_timer() else {
            for change in &important {
                let Some(stamp) = SourceStamp::from_changes(std::slice::from_ref(change)) else {
                    continue;
                };
                let bsid = self
                    .store
                    .create_buildset(
                        &self.id,
                        stamp,
                        "scheduler",
                        &self.config.builder_names,
                        &[change.number],
                    )
                    .await?;
                info!(scheduler = %self.id, buildset = %bsid, change = %change.number, "created buildset");
            }
            let unimportant_numbers: Vec<_> = unimportant.iter().map(|c| c.number).collect();
            if !unimportant_numbers.is_empty() {
                self.store
                    .retire_changes(&self.id, &unimportant_numbers)
                    .await?;
            }
            state.stable_at.remove(key);
            return Ok(None);
        };

        let Some(latest) = important.iter().map(|c| c.when).max() else {
            return Ok(None);
        };
        let stable_at = latest + window;
        if now < stable_at {
            state.stable_at.insert(key.to_string(), stable_at);
            debug!(scheduler = %self.id, branch = key, %stable_at, "debounce window open");
            // The pad past stable_at avoids a tight re-wake loop on
            // clock-boundary races.
            return Ok(Some(stable_at + Duration::seconds(1)));
        }

        let mut union = important;
        union.extend(unimportant);
        union.sort_by_key(|c| c.number);
        let numbers: Vec<_> = union.iter().map(|c| c.number).collect();
        let Some(stamp) = SourceStamp::from_changes(&union) else {
            return Ok(None);
        };
        let bsid = self
            .store
            .create_buildset(
                &self.id,
                stamp,
                "scheduler",
                &self.config.builder_names,
                &numbers,
            )
            .await?;
        info!(scheduler = %self.id, buildset = %bsid, changes = numbers.len(), "created buildset");
        state.stable_at.remove(key);
        Ok(None)
    }

    /// Inspect every subscription; re-trigger completed successful upstream
    /// buildsets against their own stamp. Subscriptions are consumed exactly
    /// once, whether or not they re-triggered.
    async fn consume_upstream_completions(&self) -> SchedulerResult<()> {
        let subscriptions = self.store.subscribed_buildsets(&self.id).await?;
        for sub in subscriptions {
            if !sub.complete {
                continue;
            }
            if sub.result.map_or(false, |r| r.is_successful()) {
                let bsid = self
                    .store
                    .create_buildset_for_stamp(
                        &self.id,
                        sub.source_stamp_id,
                        "downstream",
                        &self.config.builder_names,
                    )
                    .await?;
                info!(scheduler = %self.id, upstream_buildset = %sub.buildset_id, buildset = %bsid, "re-triggered on upstream success");
            } else {
                debug!(scheduler = %self.id, upstream_buildset = %sub.buildset_id, "upstream did not succeed, not re-triggering");
            }
            self.store
                .unsubscribe_buildset(&self.id, sub.buildset_id)
                .await?;
        }
        Ok(())
    }
}

/// Split classified changes into per-branch groups, or a single group when
/// fanning is off. Group lists stay ordered by change number.
fn group_by_branch(
    important: Vec<Change>,
    unimportant: Vec<Change>,
    fan: bool,
) -> BTreeMap<String, (Vec<Change>, Vec<Change>)> {
    let mut groups: BTreeMap<String, (Vec<Change>, Vec<Change>)> = BTreeMap::new();
    let key_of = |change: &Change| {
        if fan {
            change.branch.clone()
        } else {
            String::new()
        }
    };
    for change in important {
        groups.entry(key_of(&change)).or_default().0.push(change);
    }
    for change in unimportant {
        groups.entry(key_of(&change)).or_default().1.push(change);
    }
    groups
}
