//! Storage abstraction for the freshness engine.
//!
//! The [`Store`] trait defines every persistence operation the engine
//! needs, enabling pluggable backends ([`SqliteStore`](sqlite::SqliteStore)
//! for production, [`InMemoryStore`](memory::InMemoryStore) for tests and
//! embedding).
//!
//! Each operation commits its own rows; no cross-table transaction is
//! required. The one atomic step is
//! [`transition_queue_item`](Store::transition_queue_item), which must be a
//! single conditional update so that two workers can never both move the
//! same queue item to `processing`.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    ContentItem, ContentVersion, FreshnessRecord, FreshnessStatistics, QueueStatus,
    QueueTransition, RefreshHistoryRecord, RefreshQueueItem,
};

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_item`](Store::get_item) / [`upsert_item`](Store::upsert_item) | Current content of an item |
/// | [`get_freshness`](Store::get_freshness) / [`upsert_freshness`](Store::upsert_freshness) | Freshness record |
/// | [`stale_records`](Store::stale_records) | Most-stale-first feed |
/// | [`least_recently_checked`](Store::least_recently_checked) | Oldest checks first |
/// | [`archive_stale_since`](Store::archive_stale_since) | Archive long-stale records |
/// | [`insert_queue_item`](Store::insert_queue_item) / [`transition_queue_item`](Store::transition_queue_item) | Refresh queue |
/// | [`insert_version`](Store::insert_version) / [`get_version`](Store::get_version) | Append-only versions |
/// | [`insert_history`](Store::insert_history) | Append-only audit log |
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_item(&self, id: &str) -> Result<Option<ContentItem>>;

    async fn upsert_item(&self, item: &ContentItem) -> Result<()>;

    async fn get_freshness(&self, item_id: &str) -> Result<Option<FreshnessRecord>>;

    /// Insert or replace a record. Archiving is sticky: an upsert never
    /// clears the `archived` flag of a stored record.
    async fn upsert_freshness(&self, record: &FreshnessRecord) -> Result<()>;

    /// Non-archived records with `score < threshold`, lowest score first,
    /// ties broken by priority (critical first).
    async fn stale_records(&self, threshold: f64, limit: usize) -> Result<Vec<FreshnessRecord>>;

    /// Non-archived records ordered by last check, never-checked first.
    async fn least_recently_checked(&self, limit: usize) -> Result<Vec<FreshnessRecord>>;

    /// Archive every stale record whose `stale_since` is at or before
    /// `cutoff`. Returns the number archived.
    async fn archive_stale_since(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn freshness_statistics(&self) -> Result<FreshnessStatistics>;

    async fn insert_queue_item(&self, item: &RefreshQueueItem) -> Result<()>;

    async fn get_queue_item(&self, id: &str) -> Result<Option<RefreshQueueItem>>;

    /// Queue items, oldest scheduled first (priority as tie-break).
    async fn list_queue(
        &self,
        status: Option<QueueStatus>,
        limit: usize,
    ) -> Result<Vec<RefreshQueueItem>>;

    /// A pending or processing queue item for `item_id`, if any.
    async fn open_queue_item_for(&self, item_id: &str) -> Result<Option<RefreshQueueItem>>;

    /// Apply `transition` only if the row's current status is one of
    /// [`QueueTransition::allowed_from`]. Returns `false` when no row matched.
    async fn transition_queue_item(
        &self,
        id: &str,
        transition: &QueueTransition,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn latest_version(&self, item_id: &str) -> Result<Option<i64>>;

    /// Append a version. An existing `(item_id, version)` pair is an
    /// [`IntegrityError::DuplicateVersion`](crate::error::IntegrityError::DuplicateVersion).
    async fn insert_version(&self, version: &ContentVersion) -> Result<()>;

    async fn get_version(&self, item_id: &str, version: i64) -> Result<Option<ContentVersion>>;

    /// All versions of an item, ascending.
    async fn list_versions(&self, item_id: &str) -> Result<Vec<ContentVersion>>;

    async fn insert_history(&self, record: &RefreshHistoryRecord) -> Result<()>;

    /// Most recent first.
    async fn list_history(&self, item_id: &str, limit: usize)
        -> Result<Vec<RefreshHistoryRecord>>;
}
