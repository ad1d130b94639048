//! SQLite-backed [`Store`] implementation.
//!
//! Timestamps are stored as Unix milliseconds, snapshots as canonical JSON
//! text. Queue claims are a single `UPDATE ... WHERE status IN (...)` so the
//! compare-and-set happens inside SQLite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::{Error, IntegrityError, Result};
use crate::models::{
    ContentItem, ContentVersion, FreshnessRecord, FreshnessStatistics, QueueStatus,
    QueueTransition, RefreshHistoryRecord, RefreshQueueItem,
};
use crate::snapshot::{snapshot_from_json, snapshot_to_json, Snapshot};

use super::Store;

const PRIORITY_RANK_SQL: &str = "CASE priority WHEN 'critical' THEN 0 WHEN 'high' THEN 1 \
                                 WHEN 'normal' THEN 2 ELSE 3 END";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::Store(format!("timestamp out of range: {}", ms)))
}

fn opt_from_millis(ms: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}

fn opt_snapshot(raw: Option<String>) -> Result<Option<Snapshot>> {
    Ok(raw.as_deref().map(snapshot_from_json).transpose()?)
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn item_from_row(row: &SqliteRow) -> Result<ContentItem> {
    Ok(ContentItem {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        content: snapshot_from_json(row.try_get("content_json")?)?,
        images: snapshot_from_json(row.try_get("images_json")?)?,
        rewritten: opt_snapshot(row.try_get("rewritten_json")?)?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}

fn record_from_row(row: &SqliteRow) -> Result<FreshnessRecord> {
    let priority: String = row.try_get("priority")?;
    let last_status: Option<i64> = row.try_get("last_status")?;
    Ok(FreshnessRecord {
        item_id: row.try_get("item_id")?,
        last_checked: opt_from_millis(row.try_get("last_checked")?)?,
        last_updated: opt_from_millis(row.try_get("last_updated")?)?,
        score: row.try_get("score")?,
        is_stale: row.try_get("is_stale")?,
        priority: priority
            .parse()
            .map_err(|_| Error::Store(format!("unknown priority '{}'", priority)))?,
        last_status: last_status.and_then(|s| u16::try_from(s).ok()),
        policy: row.try_get("policy")?,
        stale_since: opt_from_millis(row.try_get("stale_since")?)?,
        archived: row.try_get("archived")?,
    })
}

fn queue_from_row(row: &SqliteRow) -> Result<RefreshQueueItem> {
    let refresh_type: String = row.try_get("refresh_type")?;
    let status: String = row.try_get("status")?;
    let priority: i64 = row.try_get("priority")?;
    let error_details: Option<String> = row.try_get("error_details")?;
    let metadata: String = row.try_get("metadata_json")?;
    Ok(RefreshQueueItem {
        id: row.try_get("id")?,
        item_id: row.try_get("item_id")?,
        refresh_type: refresh_type
            .parse()
            .map_err(|_| Error::Store(format!("unknown refresh type '{}'", refresh_type)))?,
        priority: u8::try_from(priority)
            .map_err(|_| Error::Store(format!("queue priority out of range: {}", priority)))?,
        status: status.parse()?,
        scheduled_at: from_millis(row.try_get("scheduled_at")?)?,
        started_at: opt_from_millis(row.try_get("started_at")?)?,
        completed_at: opt_from_millis(row.try_get("completed_at")?)?,
        worker_id: row.try_get("worker_id")?,
        error_message: row.try_get("error_message")?,
        error_details: error_details
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()?,
        metadata: serde_json::from_str(&metadata)?,
    })
}

fn version_from_row(row: &SqliteRow) -> Result<ContentVersion> {
    let metadata_changes: String = row.try_get("metadata_changes_json")?;
    let image_changes: String = row.try_get("image_changes_json")?;
    Ok(ContentVersion {
        item_id: row.try_get("item_id")?,
        version: row.try_get("version")?,
        content_hash: row.try_get("content_hash")?,
        rewritten_hash: row.try_get("rewritten_hash")?,
        images_hash: row.try_get("images_hash")?,
        previous_content_hash: row.try_get("previous_content_hash")?,
        previous_images_hash: row.try_get("previous_images_hash")?,
        content: snapshot_from_json(row.try_get("content_json")?)?,
        rewritten: opt_snapshot(row.try_get("rewritten_json")?)?,
        images: snapshot_from_json(row.try_get("images_json")?)?,
        metadata_changes: serde_json::from_str(&metadata_changes)?,
        image_changes: serde_json::from_str(&image_changes)?,
        change_summary: row.try_get("change_summary")?,
        change_score: row.try_get("change_score")?,
        detection_method: row.try_get("detection_method")?,
        processing_ms: row.try_get("processing_ms")?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

fn history_from_row(row: &SqliteRow) -> Result<RefreshHistoryRecord> {
    let trigger: String = row.try_get("trigger_reason")?;
    Ok(RefreshHistoryRecord {
        id: row.try_get("id")?,
        item_id: row.try_get("item_id")?,
        success: row.try_get("success")?,
        changes_found: row.try_get("changes_found")?,
        content_updated: row.try_get("content_updated")?,
        old_hash: row.try_get("old_hash")?,
        new_hash: row.try_get("new_hash")?,
        duration_ms: row.try_get("duration_ms")?,
        started_at: from_millis(row.try_get("started_at")?)?,
        completed_at: from_millis(row.try_get("completed_at")?)?,
        trigger: trigger
            .parse()
            .map_err(|_| Error::Store(format!("unknown trigger reason '{}'", trigger)))?,
        error: row.try_get("error")?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_item(&self, id: &str) -> Result<Option<ContentItem>> {
        let row = sqlx::query("SELECT * FROM content_items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(item_from_row).transpose()
    }

    async fn upsert_item(&self, item: &ContentItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO content_items (id, url, content_json, images_json, rewritten_json,
                                       created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                url = excluded.url,
                content_json = excluded.content_json,
                images_json = excluded.images_json,
                rewritten_json = excluded.rewritten_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&item.id)
        .bind(&item.url)
        .bind(snapshot_to_json(&item.content))
        .bind(snapshot_to_json(&item.images))
        .bind(item.rewritten.as_ref().map(snapshot_to_json))
        .bind(to_millis(item.created_at))
        .bind(to_millis(item.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_freshness(&self, item_id: &str) -> Result<Option<FreshnessRecord>> {
        let row = sqlx::query("SELECT * FROM freshness_records WHERE item_id = ?")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn upsert_freshness(&self, record: &FreshnessRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO freshness_records (item_id, last_checked, last_updated, score, is_stale,
                                           priority, last_status, policy, stale_since, archived)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(item_id) DO UPDATE SET
                last_checked = excluded.last_checked,
                last_updated = excluded.last_updated,
                score = excluded.score,
                is_stale = excluded.is_stale,
                priority = excluded.priority,
                last_status = excluded.last_status,
                policy = excluded.policy,
                stale_since = excluded.stale_since,
                archived = MAX(freshness_records.archived, excluded.archived)
            "#,
        )
        .bind(&record.item_id)
        .bind(record.last_checked.map(to_millis))
        .bind(record.last_updated.map(to_millis))
        .bind(record.score.clamp(0.0, 100.0))
        .bind(record.is_stale)
        .bind(record.priority.as_str())
        .bind(record.last_status.map(i64::from))
        .bind(&record.policy)
        .bind(record.stale_since.map(to_millis))
        .bind(record.archived)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn stale_records(&self, threshold: f64, limit: usize) -> Result<Vec<FreshnessRecord>> {
        let sql = format!(
            "SELECT * FROM freshness_records WHERE archived = 0 AND score < ? \
             ORDER BY score ASC, {}, item_id ASC LIMIT ?",
            PRIORITY_RANK_SQL
        );
        let rows = sqlx::query(&sql)
            .bind(threshold)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn least_recently_checked(&self, limit: usize) -> Result<Vec<FreshnessRecord>> {
        // SQLite sorts NULL first in ascending order.
        let rows = sqlx::query(
            "SELECT * FROM freshness_records WHERE archived = 0 \
             ORDER BY last_checked ASC, item_id ASC LIMIT ?",
        )
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn archive_stale_since(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE freshness_records SET archived = 1 \
             WHERE archived = 0 AND is_stale = 1 AND stale_since IS NOT NULL AND stale_since <= ?",
        )
        .bind(to_millis(cutoff))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn freshness_statistics(&self) -> Result<FreshnessStatistics> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN archived = 1 THEN 1 ELSE 0 END), 0) AS archived,
                COALESCE(SUM(CASE WHEN archived = 0 AND is_stale = 1 THEN 1 ELSE 0 END), 0) AS stale,
                COALESCE(SUM(CASE WHEN archived = 0 AND is_stale = 0 THEN 1 ELSE 0 END), 0) AS fresh,
                COALESCE(SUM(CASE WHEN archived = 0 AND last_checked IS NULL THEN 1 ELSE 0 END), 0)
                    AS never_checked,
                COALESCE(AVG(CASE WHEN archived = 0 THEN score END), 0.0) AS average_score
            FROM freshness_records
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let mut stats = FreshnessStatistics {
            total: row.try_get("total")?,
            fresh: row.try_get("fresh")?,
            stale: row.try_get("stale")?,
            archived: row.try_get("archived")?,
            never_checked: row.try_get("never_checked")?,
            average_score: row.try_get("average_score")?,
            ..Default::default()
        };

        let queue_rows =
            sqlx::query("SELECT status, COUNT(*) AS n FROM refresh_queue GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        for row in &queue_rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            match status.parse::<QueueStatus>()? {
                QueueStatus::Pending => stats.queue_pending = n,
                QueueStatus::Processing => stats.queue_processing = n,
                QueueStatus::Completed => stats.queue_completed = n,
                QueueStatus::Failed => stats.queue_failed = n,
            }
        }

        Ok(stats)
    }

    async fn insert_queue_item(&self, item: &RefreshQueueItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_queue (id, item_id, refresh_type, priority, status, scheduled_at,
                                       started_at, completed_at, worker_id, error_message,
                                       error_details, metadata_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.id)
        .bind(&item.item_id)
        .bind(item.refresh_type.as_str())
        .bind(i64::from(item.priority))
        .bind(item.status.as_str())
        .bind(to_millis(item.scheduled_at))
        .bind(item.started_at.map(to_millis))
        .bind(item.completed_at.map(to_millis))
        .bind(&item.worker_id)
        .bind(&item.error_message)
        .bind(item.error_details.as_ref().map(|d| d.to_string()))
        .bind(item.metadata.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_queue_item(&self, id: &str) -> Result<Option<RefreshQueueItem>> {
        let row = sqlx::query("SELECT * FROM refresh_queue WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(queue_from_row).transpose()
    }

    async fn list_queue(
        &self,
        status: Option<QueueStatus>,
        limit: usize,
    ) -> Result<Vec<RefreshQueueItem>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM refresh_queue WHERE status = ? \
                     ORDER BY scheduled_at ASC, priority ASC, id ASC LIMIT ?",
                )
                .bind(status.as_str())
                .bind(limit_param(limit))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM refresh_queue \
                     ORDER BY scheduled_at ASC, priority ASC, id ASC LIMIT ?",
                )
                .bind(limit_param(limit))
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(queue_from_row).collect()
    }

    async fn open_queue_item_for(&self, item_id: &str) -> Result<Option<RefreshQueueItem>> {
        let row = sqlx::query(
            "SELECT * FROM refresh_queue WHERE item_id = ? AND status IN ('pending', 'processing') \
             ORDER BY scheduled_at ASC LIMIT 1",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(queue_from_row).transpose()
    }

    async fn transition_queue_item(
        &self,
        id: &str,
        transition: &QueueTransition,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let allowed = transition
            .allowed_from()
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let target = transition.target().as_str();

        let result = match transition {
            QueueTransition::Processing { worker_id } => {
                let sql = format!(
                    "UPDATE refresh_queue SET status = ?, worker_id = ?, started_at = ? \
                     WHERE id = ? AND status IN ({})",
                    allowed
                );
                sqlx::query(&sql)
                    .bind(target)
                    .bind(worker_id)
                    .bind(to_millis(at))
                    .bind(id)
                    .execute(&self.pool)
                    .await?
            }
            QueueTransition::Completed => {
                let sql = format!(
                    "UPDATE refresh_queue SET status = ?, completed_at = ? \
                     WHERE id = ? AND status IN ({})",
                    allowed
                );
                sqlx::query(&sql)
                    .bind(target)
                    .bind(to_millis(at))
                    .bind(id)
                    .execute(&self.pool)
                    .await?
            }
            QueueTransition::Failed { message, details } => {
                let sql = format!(
                    "UPDATE refresh_queue SET status = ?, completed_at = ?, error_message = ?, \
                     error_details = ? WHERE id = ? AND status IN ({})",
                    allowed
                );
                sqlx::query(&sql)
                    .bind(target)
                    .bind(to_millis(at))
                    .bind(message)
                    .bind(details.as_ref().map(|d| d.to_string()))
                    .bind(id)
                    .execute(&self.pool)
                    .await?
            }
        };

        Ok(result.rows_affected() == 1)
    }

    async fn latest_version(&self, item_id: &str) -> Result<Option<i64>> {
        let latest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM content_versions WHERE item_id = ?")
                .bind(item_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(latest)
    }

    async fn insert_version(&self, version: &ContentVersion) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO content_versions (item_id, version, content_hash, rewritten_hash,
                                          images_hash, previous_content_hash, previous_images_hash,
                                          content_json, rewritten_json, images_json,
                                          metadata_changes_json, image_changes_json,
                                          change_summary, change_score, detection_method,
                                          processing_ms, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&version.item_id)
        .bind(version.version)
        .bind(&version.content_hash)
        .bind(&version.rewritten_hash)
        .bind(&version.images_hash)
        .bind(&version.previous_content_hash)
        .bind(&version.previous_images_hash)
        .bind(snapshot_to_json(&version.content))
        .bind(version.rewritten.as_ref().map(snapshot_to_json))
        .bind(snapshot_to_json(&version.images))
        .bind(serde_json::to_string(&version.metadata_changes)?)
        .bind(serde_json::to_string(&version.image_changes)?)
        .bind(&version.change_summary)
        .bind(version.change_score)
        .bind(&version.detection_method)
        .bind(version.processing_ms)
        .bind(to_millis(version.created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(IntegrityError::DuplicateVersion {
                    item_id: version.item_id.clone(),
                    version: version.version,
                }
                .into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_version(&self, item_id: &str, version: i64) -> Result<Option<ContentVersion>> {
        let row = sqlx::query("SELECT * FROM content_versions WHERE item_id = ? AND version = ?")
            .bind(item_id)
            .bind(version)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(version_from_row).transpose()
    }

    async fn list_versions(&self, item_id: &str) -> Result<Vec<ContentVersion>> {
        let rows =
            sqlx::query("SELECT * FROM content_versions WHERE item_id = ? ORDER BY version ASC")
                .bind(item_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(version_from_row).collect()
    }

    async fn insert_history(&self, record: &RefreshHistoryRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_history (id, item_id, success, changes_found, content_updated,
                                         old_hash, new_hash, duration_ms, started_at,
                                         completed_at, trigger_reason, error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.item_id)
        .bind(record.success)
        .bind(record.changes_found)
        .bind(record.content_updated)
        .bind(&record.old_hash)
        .bind(&record.new_hash)
        .bind(record.duration_ms)
        .bind(to_millis(record.started_at))
        .bind(to_millis(record.completed_at))
        .bind(record.trigger.as_str())
        .bind(&record.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_history(
        &self,
        item_id: &str,
        limit: usize,
    ) -> Result<Vec<RefreshHistoryRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM refresh_history WHERE item_id = ? \
             ORDER BY started_at DESC, rowid DESC LIMIT ?",
        )
        .bind(item_id)
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(history_from_row).collect()
    }
}
