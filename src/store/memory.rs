//! In-memory [`Store`] implementation for testing and embedding.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Queue transitions
//! check and update under a single write lock, which gives the same
//! compare-and-set guarantee as the SQLite conditional update.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, IntegrityError, Result};
use crate::models::{
    ContentItem, ContentVersion, FreshnessRecord, FreshnessStatistics, QueueStatus,
    QueueTransition, RefreshHistoryRecord, RefreshQueueItem,
};

use super::Store;

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    items: RwLock<HashMap<String, ContentItem>>,
    freshness: RwLock<HashMap<String, FreshnessRecord>>,
    queue: RwLock<Vec<RefreshQueueItem>>,
    versions: RwLock<Vec<ContentVersion>>,
    history: RwLock<Vec<RefreshHistoryRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| Error::Store("in-memory store lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| Error::Store("in-memory store lock poisoned".to_string()))
}

fn by_staleness(a: &FreshnessRecord, b: &FreshnessRecord) -> std::cmp::Ordering {
    a.score
        .total_cmp(&b.score)
        .then(a.priority.rank().cmp(&b.priority.rank()))
        .then(a.item_id.cmp(&b.item_id))
}

fn by_schedule(a: &RefreshQueueItem, b: &RefreshQueueItem) -> std::cmp::Ordering {
    a.scheduled_at
        .cmp(&b.scheduled_at)
        .then(a.priority.cmp(&b.priority))
        .then(a.id.cmp(&b.id))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_item(&self, id: &str) -> Result<Option<ContentItem>> {
        Ok(read(&self.items)?.get(id).cloned())
    }

    async fn upsert_item(&self, item: &ContentItem) -> Result<()> {
        write(&self.items)?.insert(item.id.clone(), item.clone());
        Ok(())
    }

    async fn get_freshness(&self, item_id: &str) -> Result<Option<FreshnessRecord>> {
        Ok(read(&self.freshness)?.get(item_id).cloned())
    }

    async fn upsert_freshness(&self, record: &FreshnessRecord) -> Result<()> {
        let mut records = write(&self.freshness)?;
        let archived = record.archived
            || records
                .get(&record.item_id)
                .is_some_and(|existing| existing.archived);
        records.insert(
            record.item_id.clone(),
            FreshnessRecord {
                archived,
                ..record.clone()
            },
        );
        Ok(())
    }

    async fn stale_records(&self, threshold: f64, limit: usize) -> Result<Vec<FreshnessRecord>> {
        let records = read(&self.freshness)?;
        let mut stale: Vec<FreshnessRecord> = records
            .values()
            .filter(|r| !r.archived && r.score < threshold)
            .cloned()
            .collect();
        stale.sort_by(by_staleness);
        stale.truncate(limit);
        Ok(stale)
    }

    async fn least_recently_checked(&self, limit: usize) -> Result<Vec<FreshnessRecord>> {
        let records = read(&self.freshness)?;
        let mut all: Vec<FreshnessRecord> =
            records.values().filter(|r| !r.archived).cloned().collect();
        // `None < Some(_)`, so never-checked records come first.
        all.sort_by(|a, b| {
            a.last_checked
                .cmp(&b.last_checked)
                .then(a.item_id.cmp(&b.item_id))
        });
        all.truncate(limit);
        Ok(all)
    }

    async fn archive_stale_since(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut records = write(&self.freshness)?;
        let mut archived = 0;
        for record in records.values_mut() {
            let long_stale = record.stale_since.is_some_and(|since| since <= cutoff);
            if !record.archived && record.is_stale && long_stale {
                record.archived = true;
                archived += 1;
            }
        }
        Ok(archived)
    }

    async fn freshness_statistics(&self) -> Result<FreshnessStatistics> {
        let records = read(&self.freshness)?;
        let mut stats = FreshnessStatistics::default();
        let mut score_sum = 0.0;
        for record in records.values() {
            stats.total += 1;
            if record.archived {
                stats.archived += 1;
                continue;
            }
            if record.is_stale {
                stats.stale += 1;
            } else {
                stats.fresh += 1;
            }
            if record.last_checked.is_none() {
                stats.never_checked += 1;
            }
            score_sum += record.score;
        }
        let active = stats.fresh + stats.stale;
        if active > 0 {
            stats.average_score = score_sum / active as f64;
        }

        for item in read(&self.queue)?.iter() {
            match item.status {
                QueueStatus::Pending => stats.queue_pending += 1,
                QueueStatus::Processing => stats.queue_processing += 1,
                QueueStatus::Completed => stats.queue_completed += 1,
                QueueStatus::Failed => stats.queue_failed += 1,
            }
        }
        Ok(stats)
    }

    async fn insert_queue_item(&self, item: &RefreshQueueItem) -> Result<()> {
        write(&self.queue)?.push(item.clone());
        Ok(())
    }

    async fn get_queue_item(&self, id: &str) -> Result<Option<RefreshQueueItem>> {
        Ok(read(&self.queue)?.iter().find(|q| q.id == id).cloned())
    }

    async fn list_queue(
        &self,
        status: Option<QueueStatus>,
        limit: usize,
    ) -> Result<Vec<RefreshQueueItem>> {
        let queue = read(&self.queue)?;
        let mut items: Vec<RefreshQueueItem> = queue
            .iter()
            .filter(|q| status.map_or(true, |s| q.status == s))
            .cloned()
            .collect();
        items.sort_by(by_schedule);
        items.truncate(limit);
        Ok(items)
    }

    async fn open_queue_item_for(&self, item_id: &str) -> Result<Option<RefreshQueueItem>> {
        Ok(read(&self.queue)?
            .iter()
            .find(|q| q.item_id == item_id && !q.status.is_terminal())
            .cloned())
    }

    async fn transition_queue_item(
        &self,
        id: &str,
        transition: &QueueTransition,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut queue = write(&self.queue)?;
        let Some(item) = queue.iter_mut().find(|q| q.id == id) else {
            return Ok(false);
        };
        if !transition.allowed_from().contains(&item.status) {
            return Ok(false);
        }
        item.status = transition.target();
        match transition {
            QueueTransition::Processing { worker_id } => {
                item.worker_id = Some(worker_id.clone());
                item.started_at = Some(at);
            }
            QueueTransition::Completed => {
                item.completed_at = Some(at);
            }
            QueueTransition::Failed { message, details } => {
                item.completed_at = Some(at);
                item.error_message = Some(message.clone());
                item.error_details = details.clone();
            }
        }
        Ok(true)
    }

    async fn latest_version(&self, item_id: &str) -> Result<Option<i64>> {
        Ok(read(&self.versions)?
            .iter()
            .filter(|v| v.item_id == item_id)
            .map(|v| v.version)
            .max())
    }

    async fn insert_version(&self, version: &ContentVersion) -> Result<()> {
        let mut versions = write(&self.versions)?;
        if versions
            .iter()
            .any(|v| v.item_id == version.item_id && v.version == version.version)
        {
            return Err(IntegrityError::DuplicateVersion {
                item_id: version.item_id.clone(),
                version: version.version,
            }
            .into());
        }
        versions.push(version.clone());
        Ok(())
    }

    async fn get_version(&self, item_id: &str, version: i64) -> Result<Option<ContentVersion>> {
        Ok(read(&self.versions)?
            .iter()
            .find(|v| v.item_id == item_id && v.version == version)
            .cloned())
    }

    async fn list_versions(&self, item_id: &str) -> Result<Vec<ContentVersion>> {
        let mut versions: Vec<ContentVersion> = read(&self.versions)?
            .iter()
            .filter(|v| v.item_id == item_id)
            .cloned()
            .collect();
        versions.sort_by_key(|v| v.version);
        Ok(versions)
    }

    async fn insert_history(&self, record: &RefreshHistoryRecord) -> Result<()> {
        write(&self.history)?.push(record.clone());
        Ok(())
    }

    async fn list_history(
        &self,
        item_id: &str,
        limit: usize,
    ) -> Result<Vec<RefreshHistoryRecord>> {
        let history = read(&self.history)?;
        Ok(history
            .iter()
            .rev()
            .filter(|h| h.item_id == item_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
