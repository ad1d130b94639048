//! The engine facade.
//!
//! [`FreshnessEngine`] wires the store, fetcher, optional deriver and
//! configuration into the tracker, queue, version store, orchestrator and
//! batch processor. It is an ordinary value: construct as many as you like,
//! each with its own collaborators.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use content_freshness::config::Config;
//! # use content_freshness::engine::{EngineParts, FreshnessEngine};
//! # use content_freshness::fetcher::StaticFetcher;
//! # use content_freshness::progress::NoProgress;
//! # use content_freshness::store::memory::InMemoryStore;
//! # async fn run() -> content_freshness::error::Result<()> {
//! let engine = FreshnessEngine::new(EngineParts {
//!     store: Arc::new(InMemoryStore::new()),
//!     fetcher: Arc::new(StaticFetcher::new()),
//!     deriver: None,
//!     settings: Config::default(),
//! });
//! let summary = engine.run_freshness_check(None, &NoProgress).await?;
//! println!("scheduled {} refreshes", summary.scheduled);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use crate::batch::{BatchProcessor, BatchResult, FreshnessCheckSummary, QueueRunSummary};
use crate::config::Config;
use crate::detection::ChangeDetector;
use crate::error::Result;
use crate::fetcher::{ContentDeriver, MetadataFetcher};
use crate::models::{ContentItem, FreshnessRecord, FreshnessStatistics};
use crate::progress::BatchProgressReporter;
use crate::queue::RefreshQueue;
use crate::regenerate::{RegenerateOptions, RegenerationResult, Regenerator, RegeneratorParts};
use crate::store::Store;
use crate::tracker::{FreshnessTracker, TrackRequest};
use crate::versions::VersionStore;

/// Everything a [`FreshnessEngine`] is built from.
pub struct EngineParts {
    pub store: Arc<dyn Store>,
    pub fetcher: Arc<dyn MetadataFetcher>,
    pub deriver: Option<Arc<dyn ContentDeriver>>,
    pub settings: Config,
}

pub struct FreshnessEngine {
    config: Arc<Config>,
    tracker: FreshnessTracker,
    queue: RefreshQueue,
    versions: VersionStore,
    regenerator: Arc<Regenerator>,
    batch: BatchProcessor,
}

impl FreshnessEngine {
    pub fn new(parts: EngineParts) -> Self {
        let config = Arc::new(parts.settings);
        let tracker = FreshnessTracker::new(parts.store.clone(), config.clone());
        let queue = RefreshQueue::new(parts.store.clone());
        let versions = VersionStore::new(parts.store.clone());
        let regenerator = Arc::new(Regenerator::new(RegeneratorParts {
            store: parts.store,
            fetcher: parts.fetcher,
            deriver: parts.deriver,
            tracker: tracker.clone(),
            detector: ChangeDetector::new(&config.detection),
            fetch_timeout: config.fetcher.deadline(),
        }));
        let batch = BatchProcessor::new(
            regenerator.clone(),
            tracker.clone(),
            queue.clone(),
            config.freshness.stale_threshold,
        );
        Self {
            config,
            tracker,
            queue,
            versions,
            regenerator,
            batch,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tracker(&self) -> &FreshnessTracker {
        &self.tracker
    }

    pub fn queue(&self) -> &RefreshQueue {
        &self.queue
    }

    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }

    pub async fn track_item(&self, request: TrackRequest) -> Result<FreshnessRecord> {
        self.tracker.track_item(request).await
    }

    /// Regenerate a single item. Errors are returned, not recovered.
    pub async fn regenerate(
        &self,
        item_id: &str,
        options: &RegenerateOptions,
    ) -> Result<RegenerationResult> {
        self.regenerator.try_regenerate(item_id, options).await
    }

    /// Regenerate many items. `concurrency` defaults to `[batch] concurrency`.
    pub async fn batch_regenerate(
        &self,
        item_ids: &[String],
        concurrency: Option<usize>,
        options: &RegenerateOptions,
        progress: &dyn BatchProgressReporter,
    ) -> BatchResult {
        let concurrency = concurrency.unwrap_or(self.config.batch.concurrency);
        self.batch
            .batch_regenerate(item_ids, concurrency, options, progress)
            .await
    }

    /// Re-score stale and due items and schedule refreshes.
    /// `batch_size` defaults to `[batch] batch_size`.
    pub async fn run_freshness_check(
        &self,
        batch_size: Option<usize>,
        progress: &dyn BatchProgressReporter,
    ) -> Result<FreshnessCheckSummary> {
        let batch_size = batch_size.unwrap_or(self.config.batch.batch_size);
        self.batch.run_freshness_check(batch_size, progress).await
    }

    pub async fn process_queue(
        &self,
        limit: Option<usize>,
        worker_id: &str,
        progress: &dyn BatchProgressReporter,
    ) -> Result<QueueRunSummary> {
        let limit = limit.unwrap_or(self.config.batch.batch_size);
        self.batch
            .process_queue(limit, worker_id, self.config.batch.concurrency, progress)
            .await
    }

    pub async fn rollback_submission(&self, item_id: &str, version: i64) -> Result<ContentItem> {
        self.versions.rollback(item_id, version).await
    }

    pub async fn get_freshness_statistics(&self) -> Result<FreshnessStatistics> {
        self.tracker.statistics().await
    }

    /// Stale records below `[freshness] stale_threshold`, most stale first.
    pub async fn get_stale_items(&self, limit: Option<usize>) -> Result<Vec<FreshnessRecord>> {
        let limit = limit.unwrap_or(self.config.freshness.stale_limit);
        self.tracker
            .get_stale_items(self.config.freshness.stale_threshold, limit)
            .await
    }

    /// Archive records stale for longer than `older_than_hours`
    /// (default `[freshness] archive_after_hours`).
    pub async fn archive_stale(&self, older_than_hours: Option<f64>) -> Result<u64> {
        let hours = older_than_hours.unwrap_or(self.config.freshness.archive_after_hours);
        self.tracker.archive_stale(hours).await
    }
}
