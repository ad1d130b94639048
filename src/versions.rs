//! Append-only version snapshots, refresh history and rollback.
//!
//! Version numbers are strictly increasing per item and never reused.
//! Version 1 is the baseline written when an item enters tracking; every
//! regeneration that changes content appends `latest + 1`. Rolling back
//! restores an item's current content from a recorded version without
//! deleting anything recorded after it.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::models::{ContentItem, ContentVersion, RefreshHistoryRecord};
use crate::snapshot::snapshot_hash;
use crate::store::Store;

/// Number of the baseline version written by `track_item`.
pub const BASELINE_VERSION: i64 = 1;

/// Detection method recorded on regeneration versions.
pub const DETECTION_METHOD: &str = "weighted_field_diff";

/// Owns creation of [`ContentVersion`] and [`RefreshHistoryRecord`] rows.
#[derive(Clone)]
pub struct VersionStore {
    store: Arc<dyn Store>,
}

impl VersionStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Version 1 for a newly tracked item.
    pub fn baseline(item: &ContentItem, at: DateTime<Utc>) -> ContentVersion {
        ContentVersion {
            item_id: item.id.clone(),
            version: BASELINE_VERSION,
            content_hash: snapshot_hash(&item.content),
            rewritten_hash: item.rewritten.as_ref().map(snapshot_hash),
            images_hash: snapshot_hash(&item.images),
            previous_content_hash: None,
            previous_images_hash: None,
            content: item.content.clone(),
            rewritten: item.rewritten.clone(),
            images: item.images.clone(),
            metadata_changes: Vec::new(),
            image_changes: Vec::new(),
            change_summary: "Initial version".to_string(),
            change_score: 0.0,
            detection_method: "baseline".to_string(),
            processing_ms: 0,
            created_at: at,
        }
    }

    /// Append a version. Fails with
    /// [`IntegrityError::DuplicateVersion`](crate::error::IntegrityError::DuplicateVersion)
    /// if the number is already taken.
    pub async fn create_version_snapshot(&self, version: &ContentVersion) -> Result<()> {
        if version.version < BASELINE_VERSION {
            return Err(Error::validation(format!(
                "version numbers start at {}, got {}",
                BASELINE_VERSION, version.version
            )));
        }
        self.store.insert_version(version).await?;
        tracing::debug!(
            item_id = %version.item_id,
            version = version.version,
            change_score = version.change_score,
            "version recorded"
        );
        Ok(())
    }

    /// `latest + 1`, never below 2 (1 is reserved for the baseline).
    pub async fn next_version_number(&self, item_id: &str) -> Result<i64> {
        let latest = self.store.latest_version(item_id).await?;
        Ok(latest.map_or(BASELINE_VERSION + 1, |v| v + 1).max(BASELINE_VERSION + 1))
    }

    pub async fn get_version(&self, item_id: &str, version: i64) -> Result<ContentVersion> {
        self.store
            .get_version(item_id, version)
            .await?
            .ok_or_else(|| Error::not_found("version", format!("{}@{}", item_id, version)))
    }

    pub async fn list_versions(&self, item_id: &str) -> Result<Vec<ContentVersion>> {
        self.store.list_versions(item_id).await
    }

    /// Restore the item's content, images and rewritten content from
    /// `target`. Returns the updated item.
    pub async fn rollback(&self, item_id: &str, target: i64) -> Result<ContentItem> {
        if target == BASELINE_VERSION {
            return Err(Error::validation(format!(
                "cannot roll back to the baseline version {}",
                BASELINE_VERSION
            )));
        }

        let mut item = self
            .store
            .get_item(item_id)
            .await?
            .ok_or_else(|| Error::not_found("item", item_id))?;
        let version = self.get_version(item_id, target).await?;

        item.content = version.content;
        item.images = version.images;
        item.rewritten = version.rewritten;
        item.updated_at = Utc::now();
        self.store.upsert_item(&item).await?;

        tracing::info!(item_id, version = target, "rolled back");
        Ok(item)
    }

    pub async fn record_history(&self, record: &RefreshHistoryRecord) -> Result<()> {
        self.store.insert_history(record).await
    }

    pub async fn list_history(
        &self,
        item_id: &str,
        limit: usize,
    ) -> Result<Vec<RefreshHistoryRecord>> {
        self.store.list_history(item_id, limit).await
    }
}
