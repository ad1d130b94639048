//! Bounded-concurrency batch operations.
//!
//! The batch processor is the only component that fans out. Work is split
//! into chunks of `concurrency` items; each chunk is awaited in full with
//! `join_all` before the next starts, and progress is reported after every
//! chunk. A failure in one item never aborts the rest of the batch.
//!
//! | Operation | What it does |
//! |-----------|--------------|
//! | [`batch_regenerate`](BatchProcessor::batch_regenerate) | Regenerate a list of items |
//! | [`run_freshness_check`](BatchProcessor::run_freshness_check) | Re-score stale and due items, schedule refreshes |
//! | [`process_queue`](BatchProcessor::process_queue) | Claim pending queue items and regenerate them |

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;

use crate::error::{Error, IntegrityError, Result};
use crate::models::{RefreshQueueItem, RefreshType, TriggerReason};
use crate::progress::{BatchProgressEvent, BatchProgressReporter};
use crate::queue::RefreshQueue;
use crate::regenerate::{RegenerateOptions, RegenerationResult, Regenerator};
use crate::tracker::{merge_unique, FreshnessTracker};

/// An item that failed inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemError {
    pub item_id: String,
    pub error: String,
}

/// Aggregate outcome of [`BatchProcessor::batch_regenerate`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    pub total_processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub changes_detected: usize,
    pub significant_changes: usize,
    pub errors: Vec<ItemError>,
    pub processing_time_ms: i64,
    pub results: Vec<RegenerationResult>,
}

impl BatchResult {
    fn push(&mut self, result: RegenerationResult) {
        self.total_processed += 1;
        if result.success {
            self.successful += 1;
        } else {
            self.failed += 1;
            self.errors.push(ItemError {
                item_id: result.item_id.clone(),
                error: result.error.clone().unwrap_or_default(),
            });
        }
        if result.changes_detected {
            self.changes_detected += 1;
        }
        if result.significant_changes {
            self.significant_changes += 1;
        }
        self.results.push(result);
    }
}

/// Outcome of [`BatchProcessor::run_freshness_check`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct FreshnessCheckSummary {
    pub checked: usize,
    /// Checked records now flagged stale (score below
    /// [`STALE_SCORE`](crate::models::STALE_SCORE)).
    pub stale: usize,
    pub scheduled: usize,
    /// Needed an update but already had an open queue entry.
    pub already_queued: usize,
    pub errors: Vec<ItemError>,
}

/// Outcome of [`BatchProcessor::process_queue`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueRunSummary {
    pub claimed: usize,
    /// Lost the claim race to another worker.
    pub skipped: usize,
    pub completed: usize,
    pub failed: usize,
    pub errors: Vec<ItemError>,
}

enum QueueOutcome {
    Skipped,
    Completed,
    Failed(ItemError),
}

pub struct BatchProcessor {
    regenerator: Arc<Regenerator>,
    tracker: FreshnessTracker,
    queue: RefreshQueue,
    stale_threshold: f64,
}

impl BatchProcessor {
    pub fn new(
        regenerator: Arc<Regenerator>,
        tracker: FreshnessTracker,
        queue: RefreshQueue,
        stale_threshold: f64,
    ) -> Self {
        Self {
            regenerator,
            tracker,
            queue,
            stale_threshold,
        }
    }

    /// Regenerate `item_ids`, at most `concurrency` at a time.
    /// Duplicate ids run once. A concurrency of 0 is treated as 1.
    pub async fn batch_regenerate(
        &self,
        item_ids: &[String],
        concurrency: usize,
        options: &RegenerateOptions,
        progress: &dyn BatchProgressReporter,
    ) -> BatchResult {
        let start = Instant::now();
        // One item must never run twice concurrently.
        let mut seen = HashSet::new();
        let item_ids: Vec<&String> = item_ids.iter().filter(|id| seen.insert(*id)).collect();
        let total = item_ids.len() as u64;
        let mut batch = BatchResult::default();

        tracing::info!(items = item_ids.len(), concurrency, "batch regeneration started");
        for chunk in item_ids.chunks(concurrency.max(1)) {
            let results = join_all(
                chunk
                    .iter()
                    .map(|id| self.regenerator.regenerate(id, options)),
            )
            .await;
            for result in results {
                batch.push(result);
            }
            progress.report(BatchProgressEvent::Processing {
                operation: "regenerate",
                n: batch.total_processed as u64,
                total,
                failed: batch.failed as u64,
            });
        }

        batch.processing_time_ms = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);
        tracing::info!(
            processed = batch.total_processed,
            successful = batch.successful,
            failed = batch.failed,
            changes = batch.changes_detected,
            elapsed_ms = batch.processing_time_ms,
            "batch regeneration finished"
        );
        batch
    }

    /// Re-score stale and due items and schedule a refresh for every item
    /// that needs one. Never regenerates inline.
    pub async fn run_freshness_check(
        &self,
        batch_size: usize,
        progress: &dyn BatchProgressReporter,
    ) -> Result<FreshnessCheckSummary> {
        progress.report(BatchProgressEvent::Selecting {
            operation: "check",
        });
        let now = Utc::now();
        let stale = self
            .tracker
            .get_stale_items(self.stale_threshold, batch_size)
            .await?;
        let due = self.tracker.get_due_items(now, batch_size).await?;
        let item_ids = merge_unique(vec![stale, due], batch_size);

        let total = item_ids.len() as u64;
        let mut summary = FreshnessCheckSummary::default();
        for (i, item_id) in item_ids.iter().enumerate() {
            if let Err(e) = self.check_one(item_id, now, &mut summary).await {
                tracing::warn!(item_id = %item_id, error = %e, "freshness check failed");
                summary.errors.push(ItemError {
                    item_id: item_id.clone(),
                    error: e.to_string(),
                });
            }
            progress.report(BatchProgressEvent::Processing {
                operation: "check",
                n: i as u64 + 1,
                total,
                failed: summary.errors.len() as u64,
            });
        }

        tracing::info!(
            checked = summary.checked,
            stale = summary.stale,
            scheduled = summary.scheduled,
            errors = summary.errors.len(),
            "freshness check finished"
        );
        Ok(summary)
    }

    async fn check_one(
        &self,
        item_id: &str,
        now: chrono::DateTime<Utc>,
        summary: &mut FreshnessCheckSummary,
    ) -> Result<()> {
        let check = self.tracker.compute_and_persist(item_id, now).await?;
        summary.checked += 1;
        if check.is_stale {
            summary.stale += 1;
        }
        if !check.needs_update {
            return Ok(());
        }
        match self
            .queue
            .schedule_for_score(item_id, check.new_score, RefreshType::Metadata, "freshness_check")
            .await?
        {
            Some(_) => summary.scheduled += 1,
            None => summary.already_queued += 1,
        }
        Ok(())
    }

    /// Claim up to `limit` pending queue items and regenerate them,
    /// `concurrency` at a time.
    pub async fn process_queue(
        &self,
        limit: usize,
        worker_id: &str,
        concurrency: usize,
        progress: &dyn BatchProgressReporter,
    ) -> Result<QueueRunSummary> {
        progress.report(BatchProgressEvent::Selecting {
            operation: "queue",
        });
        let claimed = self.queue.claim(limit).await?;
        let total = claimed.len() as u64;
        let mut summary = QueueRunSummary {
            claimed: claimed.len(),
            ..Default::default()
        };

        let mut done = 0u64;
        for chunk in claimed.chunks(concurrency.max(1)) {
            let outcomes = join_all(chunk.iter().map(|q| self.run_queue_item(q, worker_id))).await;
            for outcome in outcomes {
                match outcome {
                    QueueOutcome::Skipped => summary.skipped += 1,
                    QueueOutcome::Completed => summary.completed += 1,
                    QueueOutcome::Failed(e) => {
                        summary.failed += 1;
                        summary.errors.push(e);
                    }
                }
            }
            done += chunk.len() as u64;
            progress.report(BatchProgressEvent::Processing {
                operation: "queue",
                n: done,
                total,
                failed: summary.failed as u64,
            });
        }

        tracing::info!(
            worker_id,
            claimed = summary.claimed,
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            "queue run finished"
        );
        Ok(summary)
    }

    async fn run_queue_item(&self, queued: &RefreshQueueItem, worker_id: &str) -> QueueOutcome {
        let failed = |error: String| {
            QueueOutcome::Failed(ItemError {
                item_id: queued.item_id.clone(),
                error,
            })
        };

        match self.queue.mark_processing(&queued.id, worker_id).await {
            Ok(()) => {}
            Err(Error::Integrity(IntegrityError::ClaimConflict { .. })) => {
                tracing::debug!(queue_id = %queued.id, "claimed by another worker");
                return QueueOutcome::Skipped;
            }
            Err(e) => return failed(e.to_string()),
        }

        let options = RegenerateOptions {
            refresh_type: queued.refresh_type,
            trigger: TriggerReason::Batch,
            update_rewritten_content: queued.refresh_type != RefreshType::Validation,
        };
        let result = self.regenerator.regenerate(&queued.item_id, &options).await;

        let transition = if result.success {
            self.queue.mark_completed(&queued.id).await
        } else {
            let message = result.error.clone().unwrap_or_default();
            let details = serde_json::json!({
                "item_id": queued.item_id,
                "refresh_type": queued.refresh_type.as_str(),
                "processing_time_ms": result.processing_time_ms,
            });
            self.queue
                .mark_failed(&queued.id, &message, Some(details))
                .await
        };

        match (result.success, transition) {
            (_, Err(e)) => {
                tracing::warn!(queue_id = %queued.id, error = %e, "queue transition failed");
                failed(e.to_string())
            }
            (true, Ok(())) => QueueOutcome::Completed,
            (false, Ok(())) => failed(result.error.unwrap_or_default()),
        }
    }
}
