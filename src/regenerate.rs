//! Single-item regeneration.
//!
//! [`Regenerator::try_regenerate`] runs one item through the pipeline:
//!
//! ```text
//! load item ─► fetch metadata ┐
//!             fetch images   ┴► detect changes ─► (no changes) record check
//!                                   │
//!                                   ▼
//!                 persist content ─► derive (significant only)
//!                                   │
//!                                   ▼
//!                  append version ─► record check ─► append history
//! ```
//!
//! Both fetches run concurrently, each bounded by the configured timeout.
//! A timeout is reported as a fetch error. The orchestrator never retries;
//! wrap the fetcher in [`RetryingFetcher`](crate::fetcher::RetryingFetcher)
//! for that.
//!
//! [`Regenerator::regenerate`] is the batch-friendly variant: it never
//! fails, recording the error on the result, in a failed history row and on
//! the freshness record instead.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::detection::{change_summary, ChangeDetector};
use crate::error::{Error, FetchError, Result};
use crate::fetcher::{ContentDeriver, MetadataFetcher};
use crate::models::{ContentVersion, RefreshHistoryRecord, RefreshType, TriggerReason};
use crate::snapshot::{snapshot_hash, Snapshot};
use crate::store::Store;
use crate::tracker::FreshnessTracker;
use crate::versions::{VersionStore, DETECTION_METHOD};

/// Status recorded on the freshness record after a successful fetch.
const FETCH_OK_STATUS: u16 = 200;

#[derive(Debug, Clone, Copy)]
pub struct RegenerateOptions {
    pub refresh_type: RefreshType,
    pub trigger: TriggerReason,
    /// Invoke the content deriver when changes are significant.
    pub update_rewritten_content: bool,
}

impl Default for RegenerateOptions {
    fn default() -> Self {
        Self {
            refresh_type: RefreshType::Metadata,
            trigger: TriggerReason::Manual,
            update_rewritten_content: true,
        }
    }
}

/// Outcome of one regeneration attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegenerationResult {
    pub item_id: String,
    pub success: bool,
    pub changes_detected: bool,
    pub significant_changes: bool,
    pub change_score: f64,
    pub metadata_changes: Vec<String>,
    pub image_changes: Vec<String>,
    pub processing_time_ms: i64,
    /// Version written by this attempt, if content changed.
    pub version: Option<i64>,
    pub error: Option<String>,
}

impl RegenerationResult {
    fn failed(item_id: &str, error: &Error, elapsed_ms: i64) -> Self {
        Self {
            item_id: item_id.to_string(),
            success: false,
            changes_detected: false,
            significant_changes: false,
            change_score: 0.0,
            metadata_changes: Vec::new(),
            image_changes: Vec::new(),
            processing_time_ms: elapsed_ms,
            version: None,
            error: Some(error.to_string()),
        }
    }
}

/// Collaborators a [`Regenerator`] needs.
pub struct RegeneratorParts {
    pub store: Arc<dyn Store>,
    pub fetcher: Arc<dyn MetadataFetcher>,
    pub deriver: Option<Arc<dyn ContentDeriver>>,
    pub tracker: FreshnessTracker,
    pub detector: ChangeDetector,
    pub fetch_timeout: Duration,
}

pub struct Regenerator {
    store: Arc<dyn Store>,
    fetcher: Arc<dyn MetadataFetcher>,
    deriver: Option<Arc<dyn ContentDeriver>>,
    tracker: FreshnessTracker,
    versions: VersionStore,
    detector: ChangeDetector,
    fetch_timeout: Duration,
}

fn elapsed_ms(start: Instant) -> i64 {
    i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX)
}

impl Regenerator {
    pub fn new(parts: RegeneratorParts) -> Self {
        Self {
            versions: VersionStore::new(parts.store.clone()),
            store: parts.store,
            fetcher: parts.fetcher,
            deriver: parts.deriver,
            tracker: parts.tracker,
            detector: parts.detector,
            fetch_timeout: parts.fetch_timeout,
        }
    }

    /// Regenerate one item, recovering any error into the result.
    pub async fn regenerate(
        &self,
        item_id: &str,
        options: &RegenerateOptions,
    ) -> RegenerationResult {
        let started_at = Utc::now();
        let start = Instant::now();
        match self.try_regenerate(item_id, options).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(item_id, error = %e, "regeneration failed");
                let elapsed = elapsed_ms(start);
                self.record_failure(item_id, &e, options, started_at, elapsed)
                    .await;
                RegenerationResult::failed(item_id, &e, elapsed)
            }
        }
    }

    /// Regenerate one item, surfacing errors to the caller.
    pub async fn try_regenerate(
        &self,
        item_id: &str,
        options: &RegenerateOptions,
    ) -> Result<RegenerationResult> {
        let started_at = Utc::now();
        let start = Instant::now();

        let mut item = self
            .store
            .get_item(item_id)
            .await?
            .ok_or_else(|| Error::not_found("item", item_id))?;

        let (metadata, images) = tokio::join!(
            self.bounded(&item.url, self.fetcher.fetch_metadata(&item.url)),
            self.bounded(&item.url, self.fetcher.fetch_images(&item.url)),
        );
        let metadata = metadata?;
        let images = images?;

        let metadata_changes = self.detector.detect(Some(&item.content), Some(&metadata));
        let image_changes = self.detector.detect(Some(&item.images), Some(&images));
        let changes_detected = metadata_changes.has_changes || image_changes.has_changes;
        let significant = self.detector.is_significant(&metadata_changes)
            || self.detector.is_significant(&image_changes);
        let change_score = metadata_changes
            .change_score
            .max(image_changes.change_score);

        if !changes_detected {
            self.tracker
                .record_check(item_id, Some(FETCH_OK_STATUS), false)
                .await?;
            tracing::debug!(item_id, "no changes");
            return Ok(RegenerationResult {
                item_id: item_id.to_string(),
                success: true,
                changes_detected: false,
                significant_changes: false,
                change_score: 0.0,
                metadata_changes: Vec::new(),
                image_changes: Vec::new(),
                processing_time_ms: elapsed_ms(start),
                version: None,
                error: None,
            });
        }

        let previous_content_hash = snapshot_hash(&item.content);
        let previous_images_hash = snapshot_hash(&item.images);
        item.content = metadata;
        item.images = images;

        if significant && options.update_rewritten_content {
            if let Some(deriver) = &self.deriver {
                item.rewritten = Some(deriver.derive(&item).await?);
            }
        }
        item.updated_at = Utc::now();
        self.store.upsert_item(&item).await?;

        let number = self.versions.next_version_number(item_id).await?;
        let processing_ms = elapsed_ms(start);
        let content_hash = snapshot_hash(&item.content);
        let version = ContentVersion {
            item_id: item_id.to_string(),
            version: number,
            content_hash: content_hash.clone(),
            rewritten_hash: item.rewritten.as_ref().map(snapshot_hash),
            images_hash: snapshot_hash(&item.images),
            previous_content_hash: Some(previous_content_hash.clone()),
            previous_images_hash: Some(previous_images_hash),
            content: item.content.clone(),
            rewritten: item.rewritten.clone(),
            images: item.images.clone(),
            metadata_changes: metadata_changes.changed_fields.clone(),
            image_changes: image_changes.changed_fields.clone(),
            change_summary: change_summary(&metadata_changes, &image_changes),
            change_score,
            detection_method: DETECTION_METHOD.to_string(),
            processing_ms,
            created_at: Utc::now(),
        };
        self.versions.create_version_snapshot(&version).await?;

        self.tracker
            .record_check(item_id, Some(FETCH_OK_STATUS), true)
            .await?;

        let completed_at = Utc::now();
        self.versions
            .record_history(&RefreshHistoryRecord {
                id: uuid::Uuid::new_v4().to_string(),
                item_id: item_id.to_string(),
                success: true,
                changes_found: true,
                content_updated: true,
                old_hash: Some(previous_content_hash),
                new_hash: Some(content_hash),
                duration_ms: elapsed_ms(start),
                started_at,
                completed_at,
                trigger: options.trigger,
                error: None,
            })
            .await?;

        tracing::info!(
            item_id,
            version = number,
            change_score,
            significant,
            refresh_type = %options.refresh_type,
            summary = %version.change_summary,
            "regenerated"
        );

        Ok(RegenerationResult {
            item_id: item_id.to_string(),
            success: true,
            changes_detected: true,
            significant_changes: significant,
            change_score,
            metadata_changes: metadata_changes.changed_fields,
            image_changes: image_changes.changed_fields,
            processing_time_ms: elapsed_ms(start),
            version: Some(number),
            error: None,
        })
    }

    async fn bounded<F>(&self, url: &str, fetch: F) -> Result<Snapshot>
    where
        F: std::future::Future<Output = std::result::Result<Snapshot, FetchError>>,
    {
        match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(FetchError::Timeout {
                url: url.to_string(),
                secs: self.fetch_timeout.as_secs(),
            }
            .into()),
        }
    }

    /// Best-effort bookkeeping for a failed attempt. Errors here are logged
    /// and dropped.
    async fn record_failure(
        &self,
        item_id: &str,
        error: &Error,
        options: &RegenerateOptions,
        started_at: DateTime<Utc>,
        elapsed: i64,
    ) {
        if matches!(error, Error::NotFound { .. }) {
            return;
        }

        if let Error::SourceFetch(fetch) = error {
            if let Err(e) = self
                .tracker
                .record_check(item_id, fetch.source_status(), false)
                .await
            {
                tracing::warn!(item_id, error = %e, "could not record failed check");
            }
        }

        let history = RefreshHistoryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            item_id: item_id.to_string(),
            success: false,
            changes_found: false,
            content_updated: false,
            old_hash: None,
            new_hash: None,
            duration_ms: elapsed,
            started_at,
            completed_at: Utc::now(),
            trigger: options.trigger,
            error: Some(error.to_string()),
        };
        if let Err(e) = self.versions.record_history(&history).await {
            tracing::warn!(item_id, error = %e, "could not record failed history");
        }
    }
}
