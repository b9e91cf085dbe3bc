//! In-memory reference implementation of the storage traits.
//!
//! `MemoryChangeStore` satisfies `ChangeStore`, `CursorStore`, and
//! `SchedulerStore` behind a single mutex, which gives the in-process case
//! the transactional atomicity the trait contracts require: each operation
//! observes and commits a consistent snapshot. Persistent backends must
//! provide the same guarantees through their own transactions.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use crate::error::{StoreError, StoreResult};
use crate::model::{
    BuildResult, Buildset, BuildsetId, BuildsetSubscription, Change, ChangeEntry, ChangeNumber,
    SchedulerId, SourceStamp, SourceStampId,
};
use crate::storage_traits::{ChangeStore, CursorStore, SchedulerStore};

#[derive(Debug, Default)]
struct SchedulerRow {
    last_processed: Option<ChangeNumber>,
    /// Pending classified changes: number -> important.
    pending: BTreeMap<ChangeNumber, bool>,
    subscriptions: Vec<BuildsetId>,
}

#[derive(Debug, Default)]
struct Inner {
    changes: Vec<Change>,
    cursors: HashMap<(String, String), String>,
    schedulers: HashMap<SchedulerId, SchedulerRow>,
    /// upstream scheduler name -> watchers auto-subscribed to its buildsets.
    watchers: HashMap<String, HashSet<SchedulerId>>,
    stamps: Vec<SourceStamp>,
    buildsets: Vec<Buildset>,
}

impl Inner {
    fn change(&self, number: ChangeNumber) -> StoreResult<&Change> {
        self.changes
            .iter()
            .find(|c| c.number == number)
            .ok_or(StoreError::ChangeNotFound { number: number.0 })
    }

    fn scheduler(&mut self, id: &SchedulerId) -> &mut SchedulerRow {
        self.schedulers.entry(id.clone()).or_default()
    }

    fn insert_buildset(
        &mut self,
        creator: &SchedulerId,
        stamp_id: SourceStampId,
        reason: &str,
        builder_names: &[String],
    ) -> BuildsetId {
        let bsid = BuildsetId(self.buildsets.len() as u64 + 1);
        self.buildsets.push(Buildset {
            id: bsid,
            source_stamp_id: stamp_id,
            scheduler: creator.0.clone(),
            reason: reason.to_string(),
            builder_names: builder_names.to_vec(),
            properties: json!({ "scheduler": creator.as_str() }),
            complete: false,
            result: None,
        });
        // Hand the new buildset to every watcher of the creating scheduler.
        if let Some(watchers) = self.watchers.get(creator.as_str()).cloned() {
            for watcher in watchers {
                let row = self.scheduler(&watcher);
                if !row.subscriptions.contains(&bsid) {
                    row.subscriptions.push(bsid);
                }
            }
        }
        bsid
    }
}

/// In-memory change store backed by a single `Mutex`.
#[derive(Debug, Default)]
pub struct MemoryChangeStore {
    inner: Mutex<Inner>,
}

impl MemoryChangeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChangeStore for MemoryChangeStore {
    async fn add_change(&self, entry: ChangeEntry) -> StoreResult<ChangeNumber> {
        let mut inner = self.inner.lock().unwrap();
        let number = ChangeNumber(inner.changes.len() as u64 + 1);
        inner.changes.push(Change::from_entry(number, entry));
        Ok(number)
    }

    async fn get_change(&self, number: ChangeNumber) -> StoreResult<Change> {
        let inner = self.inner.lock().unwrap();
        inner.change(number).cloned()
    }

    async fn changes_after(&self, after: Option<ChangeNumber>) -> StoreResult<Vec<Change>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .changes
            .iter()
            .filter(|c| after.map_or(true, |n| c.number > n))
            .cloned()
            .collect())
    }

    async fn latest_change_number(&self) -> StoreResult<Option<ChangeNumber>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.changes.last().map(|c| c.number))
    }
}

#[async_trait]
impl CursorStore for MemoryChangeStore {
    async fn branch_cursor(&self, poller: &str, branch: &str) -> StoreResult<Option<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .cursors
            .get(&(poller.to_string(), branch.to_string()))
            .cloned())
    }

    async fn set_branch_cursor(
        &self,
        poller: &str,
        branch: &str,
        revision: &str,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.cursors.insert(
            (poller.to_string(), branch.to_string()),
            revision.to_string(),
        );
        Ok(())
    }
}

#[async_trait]
impl SchedulerStore for MemoryChangeStore {
    async fn scheduler_last_processed(
        &self,
        id: &SchedulerId,
    ) -> StoreResult<Option<ChangeNumber>> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.scheduler(id).last_processed)
    }

    async fn set_scheduler_last_processed(
        &self,
        id: &SchedulerId,
        number: ChangeNumber,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.scheduler(id).last_processed = Some(number);
        Ok(())
    }

    async fn classify_change(
        &self,
        id: &SchedulerId,
        number: ChangeNumber,
        important: bool,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.change(number)?;
        inner.scheduler(id).pending.insert(number, important);
        Ok(())
    }

    async fn classified_changes(
        &self,
        id: &SchedulerId,
    ) -> StoreResult<(Vec<Change>, Vec<Change>)> {
        let mut inner = self.inner.lock().unwrap();
        let pending = inner.scheduler(id).pending.clone();
        let mut important = Vec::new();
        let mut unimportant = Vec::new();
        for (number, is_important) in pending {
            let change = inner.change(number)?.clone();
            if is_important {
                important.push(change);
            } else {
                unimportant.push(change);
            }
        }
        Ok((important, unimportant))
    }

    async fn retire_changes(&self, id: &SchedulerId, numbers: &[ChangeNumber]) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let row = inner.scheduler(id);
        for number in numbers {
            row.pending.remove(number);
        }
        Ok(())
    }

    async fn create_buildset(
        &self,
        id: &SchedulerId,
        stamp: SourceStamp,
        reason: &str,
        builder_names: &[String],
        retire: &[ChangeNumber],
    ) -> StoreResult<BuildsetId> {
        let mut inner = self.inner.lock().unwrap();
        if stamp.changes.is_empty() {
            return Err(StoreError::EmptyStamp);
        }
        let stamp_id = SourceStampId(inner.stamps.len() as u64 + 1);
        inner.stamps.push(stamp);
        let bsid = inner.insert_buildset(id, stamp_id, reason, builder_names);
        let row = inner.scheduler(id);
        for number in retire {
            row.pending.remove(number);
        }
        Ok(bsid)
    }

    async fn create_buildset_for_stamp(
        &self,
        id: &SchedulerId,
        stamp_id: SourceStampId,
        reason: &str,
        builder_names: &[String],
    ) -> StoreResult<BuildsetId> {
        let mut inner = self.inner.lock().unwrap();
        if stamp_id.0 == 0 || stamp_id.0 as usize > inner.stamps.len() {
            return Err(StoreError::StampNotFound { id: stamp_id.0 });
        }
        Ok(inner.insert_buildset(id, stamp_id, reason, builder_names))
    }

    async fn get_buildset(&self, id: BuildsetId) -> StoreResult<Buildset> {
        let inner = self.inner.lock().unwrap();
        inner
            .buildsets
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or(StoreError::BuildsetNotFound { id: id.0 })
    }

    async fn get_source_stamp(&self, id: SourceStampId) -> StoreResult<SourceStamp> {
        let inner = self.inner.lock().unwrap();
        if id.0 == 0 {
            return Err(StoreError::StampNotFound { id: id.0 });
        }
        inner
            .stamps
            .get(id.0 as usize - 1)
            .cloned()
            .ok_or(StoreError::StampNotFound { id: id.0 })
    }

    async fn watch_upstream(&self, id: &SchedulerId, upstream_name: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .watchers
            .entry(upstream_name.to_string())
            .or_default()
            .insert(id.clone());
        Ok(())
    }

    async fn subscribe_to_buildset(&self, id: &SchedulerId, bsid: BuildsetId) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.buildsets.iter().any(|b| b.id == bsid) {
            return Err(StoreError::BuildsetNotFound { id: bsid.0 });
        }
        let row = inner.scheduler(id);
        if !row.subscriptions.contains(&bsid) {
            row.subscriptions.push(bsid);
        }
        Ok(())
    }

    async fn subscribed_buildsets(
        &self,
        id: &SchedulerId,
    ) -> StoreResult<Vec<BuildsetSubscription>> {
        let mut inner = self.inner.lock().unwrap();
        let mut subscriptions = inner.scheduler(id).subscriptions.clone();
        subscriptions.sort();
        subscriptions
            .into_iter()
            .map(|bsid| {
                let bs = inner
                    .buildsets
                    .iter()
                    .find(|b| b.id == bsid)
                    .ok_or(StoreError::BuildsetNotFound { id: bsid.0 })?;
                Ok(BuildsetSubscription {
                    buildset_id: bs.id,
                    source_stamp_id: bs.source_stamp_id,
                    complete: bs.complete,
                    result: bs.result,
                })
            })
            .collect()
    }

    async fn unsubscribe_buildset(&self, id: &SchedulerId, bsid: BuildsetId) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.scheduler(id).subscriptions.retain(|b| *b != bsid);
        Ok(())
    }

    async fn complete_buildset(&self, bsid: BuildsetId, result: BuildResult) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let bs = inner
            .buildsets
            .iter_mut()
            .find(|b| b.id == bsid)
            .ok_or(StoreError::BuildsetNotFound { id: bsid.0 })?;
        bs.complete = true;
        bs.result = Some(result);
        Ok(())
    }
}
