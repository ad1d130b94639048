//! Freshness tracking.
//!
//! The [`FreshnessTracker`] is the only component that mutates
//! [`FreshnessRecord`]s. It registers items, re-scores them with
//! [`staleness_score`], feeds the stale and due lists to the batch
//! processor, records the outcome of regeneration attempts and archives
//! records that have been stale for too long.
//!
//! # Scoring Pass
//!
//! [`compute_and_persist`](FreshnessTracker::compute_and_persist) scores a
//! record against its policy and stamps the check time. The item needs an
//! update when any of these hold:
//!
//! - the new score is below `critical_threshold` (default 30)
//! - it was never checked before
//! - the last check is at least `check_frequency_hours` old
//! - the last source status was an HTTP error (≥ 400)

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{
    ContentItem, FreshnessPatch, FreshnessPolicy, FreshnessRecord, FreshnessStatistics,
    PriorityLevel,
};
use crate::scoring::{hours_between, round_score, staleness_score, ScoreInput};
use crate::snapshot::Snapshot;
use crate::store::Store;
use crate::versions::VersionStore;

/// A new item to start tracking.
#[derive(Debug, Clone)]
pub struct TrackRequest {
    pub id: String,
    pub url: String,
    pub content: Snapshot,
    pub images: Snapshot,
    pub priority: PriorityLevel,
    /// Policy name; `None` uses `[freshness] default_policy`.
    pub policy: Option<String>,
}

/// Outcome of one scoring pass over a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FreshnessCheck {
    pub item_id: String,
    pub previous_score: f64,
    pub new_score: f64,
    pub needs_update: bool,
    pub is_stale: bool,
}

#[derive(Clone)]
pub struct FreshnessTracker {
    store: Arc<dyn Store>,
    versions: VersionStore,
    config: Arc<Config>,
}

impl FreshnessTracker {
    pub fn new(store: Arc<dyn Store>, config: Arc<Config>) -> Self {
        Self {
            versions: VersionStore::new(store.clone()),
            store,
            config,
        }
    }

    /// Policy for a record, falling back to the configured default.
    pub fn policy_for(&self, record: &FreshnessRecord) -> FreshnessPolicy {
        self.config.policy(record.policy.as_deref())
    }

    /// Register an item: stores its content, creates its freshness record
    /// and writes the baseline version.
    pub async fn track_item(&self, request: TrackRequest) -> Result<FreshnessRecord> {
        if request.id.trim().is_empty() {
            return Err(Error::validation("item id must not be empty"));
        }
        if request.url.trim().is_empty() {
            return Err(Error::validation("item url must not be empty"));
        }
        if let Some(name) = request.policy.as_deref() {
            if !self.config.policies.iter().any(|p| p.name == name) {
                return Err(Error::validation(format!("unknown policy '{}'", name)));
            }
        }
        if self.store.get_item(&request.id).await?.is_some() {
            return Err(Error::validation(format!(
                "item '{}' is already tracked",
                request.id
            )));
        }

        let now = Utc::now();
        let item = ContentItem {
            id: request.id.clone(),
            url: request.url,
            content: request.content,
            images: request.images,
            rewritten: None,
            created_at: now,
            updated_at: now,
        };
        self.store.upsert_item(&item).await?;

        // The supplied content counts as an update; the first check is still
        // outstanding.
        let mut record = FreshnessRecord::new(&item.id, request.priority, request.policy);
        record.last_updated = Some(now);
        let score = staleness_score(&ScoreInput::from(&record), &self.policy_for(&record), now);
        record.apply_score(score, now);
        self.store.upsert_freshness(&record).await?;

        self.versions
            .create_version_snapshot(&VersionStore::baseline(&item, now))
            .await?;

        tracing::info!(
            item_id = %item.id,
            priority = %record.priority,
            score = round_score(record.score),
            "tracking item"
        );
        Ok(record)
    }

    pub async fn check_freshness(&self, item_id: &str) -> Result<FreshnessRecord> {
        self.store
            .get_freshness(item_id)
            .await?
            .ok_or_else(|| Error::not_found("freshness record", item_id))
    }

    /// Apply a partial update. The check timestamp is only changed when the
    /// patch carries one.
    pub async fn update_freshness_status(
        &self,
        item_id: &str,
        patch: FreshnessPatch,
    ) -> Result<FreshnessRecord> {
        let mut record = self.check_freshness(item_id).await?;
        if let Some(policy) = patch.policy.as_deref() {
            if !self.config.policies.iter().any(|p| p.name == policy) {
                return Err(Error::validation(format!("unknown policy '{}'", policy)));
            }
        }

        if patch.last_checked.is_some() {
            record.last_checked = patch.last_checked;
        }
        if patch.last_updated.is_some() {
            record.last_updated = patch.last_updated;
        }
        if let Some(priority) = patch.priority {
            record.priority = priority;
        }
        if patch.last_status.is_some() {
            record.last_status = patch.last_status;
        }
        if patch.policy.is_some() {
            record.policy = patch.policy;
        }
        if let Some(score) = patch.score {
            if score.is_nan() {
                return Err(Error::validation("score must be a number"));
            }
            record.apply_score(score, Utc::now());
        }

        self.store.upsert_freshness(&record).await?;
        Ok(record)
    }

    /// Non-archived records scoring below `threshold`, most stale first.
    pub async fn get_stale_items(
        &self,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<FreshnessRecord>> {
        self.store.stale_records(threshold, limit).await
    }

    /// Non-archived records never checked, or checked longer ago than their
    /// policy's check frequency. Never-checked records come first.
    pub async fn get_due_items(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FreshnessRecord>> {
        let candidates = self.store.least_recently_checked(usize::MAX).await?;
        Ok(candidates
            .into_iter()
            .filter(|record| match record.last_checked {
                None => true,
                Some(checked) => {
                    hours_between(checked, now) >= self.policy_for(record).check_frequency_hours
                }
            })
            .take(limit)
            .collect())
    }

    /// Re-score a record, persist the score and stamp the check time.
    pub async fn compute_and_persist(
        &self,
        item_id: &str,
        now: DateTime<Utc>,
    ) -> Result<FreshnessCheck> {
        let mut record = self.check_freshness(item_id).await?;
        let policy = self.policy_for(&record);
        let previous_score = record.score;
        let new_score = staleness_score(&ScoreInput::from(&record), &policy, now);

        let overdue = match record.last_checked {
            None => true,
            Some(checked) => hours_between(checked, now) >= policy.check_frequency_hours,
        };
        let source_error = record.last_status.is_some_and(|s| s >= 400);
        let needs_update =
            new_score < self.config.freshness.critical_threshold || overdue || source_error;

        record.apply_score(new_score, now);
        record.last_checked = Some(now);
        self.store.upsert_freshness(&record).await?;

        tracing::debug!(
            item_id,
            previous = round_score(previous_score),
            score = round_score(new_score),
            needs_update,
            "freshness computed"
        );
        Ok(FreshnessCheck {
            item_id: item_id.to_string(),
            previous_score,
            new_score,
            needs_update,
            is_stale: record.is_stale,
        })
    }

    /// Record the outcome of a regeneration attempt.
    ///
    /// `status` is the source HTTP status when one is known; `None` keeps
    /// the previous value.
    pub async fn record_check(
        &self,
        item_id: &str,
        status: Option<u16>,
        content_updated: bool,
    ) -> Result<FreshnessRecord> {
        let now = Utc::now();
        let mut record = self.check_freshness(item_id).await?;
        record.last_checked = Some(now);
        if status.is_some() {
            record.last_status = status;
        }
        if content_updated {
            record.last_updated = Some(now);
        }
        let score = staleness_score(&ScoreInput::from(&record), &self.policy_for(&record), now);
        record.apply_score(score, now);
        self.store.upsert_freshness(&record).await?;
        Ok(record)
    }

    /// Archive records that have been stale for longer than
    /// `older_than_hours`. Returns how many were archived.
    pub async fn archive_stale(&self, older_than_hours: f64) -> Result<u64> {
        if !older_than_hours.is_finite() || older_than_hours < 0.0 {
            return Err(Error::validation(
                "archive threshold must be a finite, non-negative number of hours",
            ));
        }
        // A window reaching past the representable range has nothing old enough.
        let Some(cutoff) = Duration::try_seconds((older_than_hours * 3600.0) as i64)
            .and_then(|window| Utc::now().checked_sub_signed(window))
        else {
            return Ok(0);
        };
        let archived = self.store.archive_stale_since(cutoff).await?;
        if archived > 0 {
            tracing::info!(archived, older_than_hours, "archived stale records");
        }
        Ok(archived)
    }

    pub async fn statistics(&self) -> Result<FreshnessStatistics> {
        let mut stats = self.store.freshness_statistics().await?;
        stats.average_score = round_score(stats.average_score);
        Ok(stats)
    }
}

/// Merge lists of records by item id, keeping first occurrences in order.
pub(crate) fn merge_unique(lists: Vec<Vec<FreshnessRecord>>, limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    lists
        .into_iter()
        .flatten()
        .filter(|r| seen.insert(r.item_id.clone()))
        .map(|r| r.item_id)
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use serde_json::json;

    fn setup() -> (Arc<dyn Store>, FreshnessTracker) {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let tracker = FreshnessTracker::new(store.clone(), Arc::new(Config::default()));
        (store, tracker)
    }

    fn request(id: &str) -> TrackRequest {
        let mut content = Snapshot::new();
        content.insert("title".into(), json!(format!("Title {}", id)));
        TrackRequest {
            id: id.to_string(),
            url: format!("https://example.com/{}", id),
            content,
            images: Snapshot::new(),
            priority: PriorityLevel::Normal,
            policy: None,
        }
    }

    #[tokio::test]
    async fn track_item_writes_record_and_baseline() {
        let (store, tracker) = setup();
        let record = tracker.track_item(request("a")).await.unwrap();
        assert!(record.last_checked.is_none());
        // Never checked: 100 - 40.
        assert_eq!(record.score, 60.0);
        assert!(!record.is_stale);

        assert!(store.get_item("a").await.unwrap().is_some());
        assert_eq!(store.latest_version("a").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn track_item_rejects_duplicates_and_unknown_policies() {
        let (_, tracker) = setup();
        tracker.track_item(request("a")).await.unwrap();
        assert!(matches!(
            tracker.track_item(request("a")).await,
            Err(Error::Validation(_))
        ));

        let mut bad = request("b");
        bad.policy = Some("hourly".into());
        assert!(matches!(
            tracker.track_item(bad).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn check_freshness_not_found() {
        let (_, tracker) = setup();
        assert!(matches!(
            tracker.check_freshness("ghost").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn update_clamps_score_and_tracks_stale_since() {
        let (_, tracker) = setup();
        tracker.track_item(request("a")).await.unwrap();
        let record = tracker
            .update_freshness_status(
                "a",
                FreshnessPatch {
                    score: Some(-5.0),
                    priority: Some(PriorityLevel::Critical),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(record.score, 0.0);
        assert!(record.is_stale);
        assert!(record.stale_since.is_some());
        assert!(record.last_checked.is_none());
        assert_eq!(record.priority, PriorityLevel::Critical);
    }

    #[tokio::test]
    async fn stale_items_ordered_by_score_then_priority() {
        let (_, tracker) = setup();
        for (id, score, priority) in [
            ("low", 20.0, PriorityLevel::Low),
            ("crit", 20.0, PriorityLevel::Critical),
            ("worst", 5.0, PriorityLevel::Normal),
            ("fresh", 90.0, PriorityLevel::Normal),
        ] {
            tracker.track_item(request(id)).await.unwrap();
            tracker
                .update_freshness_status(
                    id,
                    FreshnessPatch {
                        score: Some(score),
                        priority: Some(priority),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }
        let stale: Vec<String> = tracker
            .get_stale_items(50.0, 100)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.item_id)
            .collect();
        assert_eq!(stale, vec!["worst", "crit", "low"]);
    }

    #[tokio::test]
    async fn compute_and_persist_flags_first_check() {
        let (_, tracker) = setup();
        tracker.track_item(request("a")).await.unwrap();
        let now = Utc::now();
        let check = tracker.compute_and_persist("a", now).await.unwrap();
        assert!(check.needs_update);
        assert_eq!(check.previous_score, 60.0);

        // Just checked: no longer due, not an error, score recovers the
        // never-checked penalty on the next pass.
        let again = tracker
            .compute_and_persist("a", now + Duration::hours(1))
            .await
            .unwrap();
        assert!(!again.needs_update);
        assert_eq!(again.new_score, 100.0);
    }

    #[tokio::test]
    async fn due_items_respect_check_frequency() {
        let (_, tracker) = setup();
        tracker.track_item(request("a")).await.unwrap();
        tracker.track_item(request("b")).await.unwrap();
        let now = Utc::now();
        tracker.compute_and_persist("a", now).await.unwrap();

        let due = tracker.get_due_items(now, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].item_id, "b");

        // Standard policy re-checks daily.
        let later = tracker
            .get_due_items(now + Duration::hours(25), 10)
            .await
            .unwrap();
        assert_eq!(later.len(), 2);
    }

    #[tokio::test]
    async fn record_check_keeps_last_known_status() {
        let (_, tracker) = setup();
        tracker.track_item(request("a")).await.unwrap();
        let record = tracker.record_check("a", Some(404), false).await.unwrap();
        assert_eq!(record.last_status, Some(404));
        assert_eq!(record.score, 60.0);

        let record = tracker.record_check("a", None, true).await.unwrap();
        assert_eq!(record.last_status, Some(404));
    }

    #[tokio::test]
    async fn archive_excludes_long_stale_records() {
        let (_, tracker) = setup();
        tracker.track_item(request("a")).await.unwrap();
        tracker
            .update_freshness_status(
                "a",
                FreshnessPatch {
                    score: Some(10.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(tracker.archive_stale(720.0).await.unwrap(), 0);
        assert_eq!(tracker.archive_stale(0.0).await.unwrap(), 1);
        assert!(tracker.get_stale_items(50.0, 10).await.unwrap().is_empty());
        assert!(tracker.get_due_items(Utc::now(), 10).await.unwrap().is_empty());

        let stats = tracker.statistics().await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.archived, 1);
        assert!(matches!(
            tracker.archive_stale(-1.0).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn archive_with_huge_window_archives_nothing() {
        let (_, tracker) = setup();
        tracker.track_item(request("a")).await.unwrap();
        tracker
            .update_freshness_status(
                "a",
                FreshnessPatch {
                    score: Some(10.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(tracker.archive_stale(1e13).await.unwrap(), 0);
        assert_eq!(tracker.archive_stale(f64::MAX).await.unwrap(), 0);
        for bad in [f64::INFINITY, f64::NAN] {
            assert!(matches!(
                tracker.archive_stale(bad).await,
                Err(Error::Validation(_))
            ));
        }
        assert_eq!(tracker.get_stale_items(50.0, 10).await.unwrap().len(), 1);
    }

    #[test]
    fn merge_unique_keeps_first_occurrence() {
        let rec = |id: &str| FreshnessRecord::new(id, PriorityLevel::Normal, None);
        let ids = merge_unique(
            vec![vec![rec("a"), rec("b")], vec![rec("b"), rec("c")]],
            10,
        );
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
