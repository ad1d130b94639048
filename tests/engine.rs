//! End-to-end tests for the freshness engine against the in-memory store
//! and a static fetcher.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use content_freshness::config::Config;
use content_freshness::detection::ChangeDetector;
use content_freshness::engine::{EngineParts, FreshnessEngine};
use content_freshness::error::{Error, FetchError, IntegrityError, Result};
use content_freshness::fetcher::{ContentDeriver, StaticFetcher};
use content_freshness::models::{
    ContentItem, FreshnessPatch, PriorityLevel, QueueStatus, RefreshType, TriggerReason,
};
use content_freshness::progress::NoProgress;
use content_freshness::queue::RefreshQueue;
use content_freshness::regenerate::{RegenerateOptions, Regenerator, RegeneratorParts};
use content_freshness::snapshot::Snapshot;
use content_freshness::store::memory::InMemoryStore;
use content_freshness::store::Store;
use content_freshness::tracker::{FreshnessTracker, TrackRequest};

// ─── Helpers ────────────────────────────────────────────────────────

fn snap(v: Value) -> Snapshot {
    match v {
        Value::Object(map) => map,
        _ => panic!("snapshot must be an object"),
    }
}

fn url(id: &str) -> String {
    format!("https://example.com/{}", id)
}

/// Derives a one-field summary from the title and counts invocations.
#[derive(Default)]
struct CountingDeriver {
    calls: AtomicUsize,
}

#[async_trait]
impl ContentDeriver for CountingDeriver {
    async fn derive(&self, item: &ContentItem) -> Result<Snapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let title = item.content.get("title").cloned().unwrap_or(Value::Null);
        Ok(snap(json!({ "summary": title })))
    }
}

struct Harness {
    engine: FreshnessEngine,
    store: Arc<InMemoryStore>,
    fetcher: Arc<StaticFetcher>,
    deriver: Arc<CountingDeriver>,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let fetcher = Arc::new(StaticFetcher::new());
    let deriver = Arc::new(CountingDeriver::default());
    let engine = FreshnessEngine::new(EngineParts {
        store: store.clone(),
        fetcher: fetcher.clone(),
        deriver: Some(deriver.clone() as Arc<dyn ContentDeriver>),
        settings: Config::default(),
    });
    Harness {
        engine,
        store,
        fetcher,
        deriver,
    }
}

impl Harness {
    async fn track(&self, id: &str, title: &str) {
        self.engine
            .track_item(TrackRequest {
                id: id.to_string(),
                url: url(id),
                content: snap(json!({ "title": title, "views": 1 })),
                images: snap(json!({ "primary": "https://cdn.example.com/a.png" })),
                priority: PriorityLevel::Normal,
                policy: None,
            })
            .await
            .unwrap();
    }

    fn serve(&self, id: &str, content: Value) {
        self.fetcher.set(
            &url(id),
            snap(content),
            snap(json!({ "primary": "https://cdn.example.com/a.png" })),
        );
    }
}

// ─── Regeneration ───────────────────────────────────────────────────

#[tokio::test]
async fn test_regenerate_significant_change_writes_version() {
    let h = harness();
    h.track("a", "Old").await;
    h.serve("a", json!({ "title": "New", "views": 1 }));

    let result = h
        .engine
        .regenerate("a", &RegenerateOptions::default())
        .await
        .unwrap();
    assert!(result.success);
    assert!(result.changes_detected);
    assert!(result.significant_changes);
    assert_eq!(result.metadata_changes, vec!["title"]);
    assert!(result.image_changes.is_empty());
    assert!((result.change_score - 0.40).abs() < 1e-9);
    assert_eq!(result.version, Some(2));
    assert_eq!(h.deriver.calls.load(Ordering::SeqCst), 1);

    let item = h.store.get_item("a").await.unwrap().unwrap();
    assert_eq!(item.content["title"], json!("New"));
    assert_eq!(item.rewritten.unwrap()["summary"], json!("New"));

    let version = h.engine.versions().get_version("a", 2).await.unwrap();
    assert_eq!(version.change_summary, "Metadata: title");
    assert!(version.previous_content_hash.is_some());
    assert_ne!(version.previous_content_hash.as_deref(), Some(version.content_hash.as_str()));

    let history = h.engine.versions().list_history("a", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].success && history[0].content_updated);
    assert_eq!(history[0].trigger, TriggerReason::Manual);

    let record = h.engine.tracker().check_freshness("a").await.unwrap();
    assert_eq!(record.last_status, Some(200));
    assert!(record.last_checked.is_some());
}

#[tokio::test]
async fn test_regenerate_without_changes_only_records_check() {
    let h = harness();
    h.track("a", "Same").await;
    h.serve("a", json!({ "title": "Same", "views": 1 }));

    let result = h
        .engine
        .regenerate("a", &RegenerateOptions::default())
        .await
        .unwrap();
    assert!(result.success);
    assert!(!result.changes_detected);
    assert_eq!(result.version, None);
    assert_eq!(h.store.latest_version("a").await.unwrap(), Some(1));
    assert!(h.engine.versions().list_history("a", 10).await.unwrap().is_empty());
    assert!(h
        .engine
        .tracker()
        .check_freshness("a")
        .await
        .unwrap()
        .last_checked
        .is_some());
}

#[tokio::test]
async fn test_insignificant_change_skips_deriver() {
    let h = harness();
    h.track("a", "Same").await;
    h.serve("a", json!({ "title": "Same", "views": 500 }));

    let result = h
        .engine
        .regenerate("a", &RegenerateOptions::default())
        .await
        .unwrap();
    assert!(result.changes_detected);
    assert!(!result.significant_changes);
    assert_eq!(result.metadata_changes, vec!["views"]);
    assert_eq!(result.version, Some(2));
    assert_eq!(h.deriver.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_deriver_disabled_by_option() {
    let h = harness();
    h.track("a", "Old").await;
    h.serve("a", json!({ "title": "New" }));

    let options = RegenerateOptions {
        update_rewritten_content: false,
        ..Default::default()
    };
    let result = h.engine.regenerate("a", &options).await.unwrap();
    assert!(result.significant_changes);
    assert_eq!(h.deriver.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_versions_are_monotonic() {
    let h = harness();
    h.track("a", "v1").await;
    for n in 2..=5 {
        h.serve("a", json!({ "title": format!("v{}", n) }));
        let result = h
            .engine
            .regenerate("a", &RegenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(result.version, Some(n));
    }
    let numbers: Vec<i64> = h
        .engine
        .versions()
        .list_versions("a")
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.version)
        .collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_regenerate_errors_are_surfaced_for_single_calls() {
    let h = harness();
    assert!(matches!(
        h.engine
            .regenerate("ghost", &RegenerateOptions::default())
            .await,
        Err(Error::NotFound { .. })
    ));

    h.track("a", "Old").await;
    h.fetcher.fail(
        &url("a"),
        FetchError::Status {
            url: url("a"),
            status: 503,
        },
    );
    let err = h
        .engine
        .regenerate("a", &RegenerateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SourceFetch(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_fetch_timeout_is_a_fetch_error() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let config = Arc::new(Config::default());
    let tracker = FreshnessTracker::new(store.clone(), config.clone());
    tracker
        .track_item(TrackRequest {
            id: "slow".into(),
            url: url("slow"),
            content: Snapshot::new(),
            images: Snapshot::new(),
            priority: PriorityLevel::High,
            policy: None,
        })
        .await
        .unwrap();

    let fetcher = StaticFetcher::new().with_delay(Duration::from_millis(500));
    fetcher.set(&url("slow"), snap(json!({"title": "x"})), Snapshot::new());
    let regenerator = Regenerator::new(RegeneratorParts {
        store: store.clone(),
        fetcher: Arc::new(fetcher),
        deriver: None,
        tracker,
        detector: ChangeDetector::new(&config.detection),
        fetch_timeout: Duration::from_millis(20),
    });

    let result = regenerator
        .regenerate("slow", &RegenerateOptions::default())
        .await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("timed out"));

    let history = store.list_history("slow", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(!history[0].success);
}

// ─── Batch ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_batch_isolates_failures() {
    let h = harness();
    let ids: Vec<String> = (0..10).map(|i| format!("item-{}", i)).collect();
    for id in &ids {
        h.track(id, "Old").await;
        if id != "item-7" {
            h.serve(id, json!({ "title": format!("New {}", id) }));
        }
    }

    let batch = h
        .engine
        .batch_regenerate(&ids, Some(3), &RegenerateOptions::default(), &NoProgress)
        .await;
    assert_eq!(batch.total_processed, 10);
    assert_eq!(batch.successful, 9);
    assert_eq!(batch.failed, 1);
    assert_eq!(batch.changes_detected, 9);
    assert_eq!(batch.errors.len(), 1);
    assert_eq!(batch.errors[0].item_id, "item-7");
    assert!(batch.errors[0].error.contains("404"));
    assert_eq!(batch.results.len(), 10);

    let record = h.engine.tracker().check_freshness("item-7").await.unwrap();
    assert_eq!(record.last_status, Some(404));
    let history = h.engine.versions().list_history("item-7", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(!history[0].success);
    assert!(history[0].error.is_some());
}

#[tokio::test]
async fn test_batch_zero_concurrency_is_one() {
    let h = harness();
    h.track("a", "Old").await;
    h.serve("a", json!({ "title": "New" }));
    let batch = h
        .engine
        .batch_regenerate(
            &["a".to_string()],
            Some(0),
            &RegenerateOptions::default(),
            &NoProgress,
        )
        .await;
    assert_eq!(batch.successful, 1);
}

#[tokio::test]
async fn test_freshness_check_schedules_without_regenerating() {
    let h = harness();
    for id in ["a", "b", "c"] {
        h.track(id, "Old").await;
    }

    let summary = h.engine.run_freshness_check(None, &NoProgress).await.unwrap();
    assert_eq!(summary.checked, 3);
    assert_eq!(summary.scheduled, 3);
    assert!(summary.errors.is_empty());
    assert_eq!(h.fetcher.calls(), 0);

    let pending = h
        .engine
        .queue()
        .list(Some(QueueStatus::Pending), 10)
        .await
        .unwrap();
    assert_eq!(pending.len(), 3);
    // Never-checked items score 60: priority bucket 7.
    assert!(pending.iter().all(|q| q.priority == 7));

    // Everything was just checked: nothing is due or stale.
    let again = h.engine.run_freshness_check(None, &NoProgress).await.unwrap();
    assert_eq!(again.checked, 0);
    assert_eq!(again.scheduled, 0);
}

#[tokio::test]
async fn test_process_queue_completes_and_fails_items() {
    let h = harness();
    h.track("ok", "Old").await;
    h.track("broken", "Old").await;
    h.serve("ok", json!({ "title": "New" }));

    h.engine.run_freshness_check(None, &NoProgress).await.unwrap();
    let summary = h
        .engine
        .process_queue(None, "worker-1", &NoProgress)
        .await
        .unwrap();
    assert_eq!(summary.claimed, 2);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.errors[0].item_id, "broken");

    let failed = h
        .engine
        .queue()
        .list(Some(QueueStatus::Failed), 10)
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].worker_id.as_deref(), Some("worker-1"));
    assert!(failed[0].error_message.is_some());

    let history = h.engine.versions().list_history("ok", 10).await.unwrap();
    assert_eq!(history[0].trigger, TriggerReason::Batch);

    let stats = h.engine.get_freshness_statistics().await.unwrap();
    assert_eq!(stats.queue_completed, 1);
    assert_eq!(stats.queue_failed, 1);
    assert_eq!(stats.queue_pending, 0);
}

// ─── Rollback ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_rollback_restores_version() {
    let h = harness();
    h.track("a", "A").await;
    for title in ["B", "C"] {
        h.serve("a", json!({ "title": title }));
        h.engine
            .regenerate("a", &RegenerateOptions::default())
            .await
            .unwrap();
    }

    let item = h.engine.rollback_submission("a", 2).await.unwrap();
    assert_eq!(item.content["title"], json!("B"));
    assert_eq!(item.rewritten.unwrap()["summary"], json!("B"));
    assert_eq!(h.engine.versions().list_versions("a").await.unwrap().len(), 3);

    assert!(matches!(
        h.engine.rollback_submission("a", 1).await,
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        h.engine.rollback_submission("a", 9).await,
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_archive_uses_configured_default() {
    let h = harness();
    h.track("a", "A").await;
    h.engine
        .tracker()
        .update_freshness_status(
            "a",
            FreshnessPatch {
                score: Some(5.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(h.engine.get_stale_items(None).await.unwrap().len(), 1);
    // Just became stale; the default 720h window has not elapsed.
    assert_eq!(h.engine.archive_stale(None).await.unwrap(), 0);
    assert_eq!(h.engine.archive_stale(Some(0.0)).await.unwrap(), 1);
    assert!(h.engine.get_stale_items(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_batch_runs_duplicate_ids_once() {
    let h = harness();
    h.track("a", "Old").await;
    h.track("b", "Old").await;
    h.serve("a", json!({ "title": "New a" }));
    h.serve("b", json!({ "title": "New b" }));

    let ids: Vec<String> = ["a", "a", "b", "a"].iter().map(|s| s.to_string()).collect();
    let batch = h
        .engine
        .batch_regenerate(&ids, Some(4), &RegenerateOptions::default(), &NoProgress)
        .await;
    assert_eq!(batch.total_processed, 2);
    assert_eq!(batch.successful, 2);
    assert_eq!(h.store.latest_version("a").await.unwrap(), Some(2));
    assert_eq!(h.engine.versions().list_history("a", 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_stale_selection_threshold_does_not_flag_records() {
    let mut settings = Config::default();
    settings.freshness.stale_threshold = 70.0;
    let engine = FreshnessEngine::new(EngineParts {
        store: Arc::new(InMemoryStore::new()),
        fetcher: Arc::new(StaticFetcher::new()),
        deriver: None,
        settings,
    });
    engine
        .track_item(TrackRequest {
            id: "a".into(),
            url: url("a"),
            content: Snapshot::new(),
            images: Snapshot::new(),
            priority: PriorityLevel::Normal,
            policy: None,
        })
        .await
        .unwrap();
    // First check stamps last_checked; the score stays 60.
    engine.run_freshness_check(None, &NoProgress).await.unwrap();
    assert_eq!(engine.get_stale_items(None).await.unwrap().len(), 1);

    // Selected by the 70 cutoff, but 60 is not stale.
    let summary = engine.run_freshness_check(None, &NoProgress).await.unwrap();
    assert_eq!(summary.checked, 1);
    assert_eq!(summary.stale, 0);
    assert_eq!(summary.already_queued, 0);
}

// ─── Archiving ──────────────────────────────────────────────────────

async fn assert_archive_survives_stale_upsert(store: Arc<dyn Store>) {
    let tracker = FreshnessTracker::new(store.clone(), Arc::new(Config::default()));
    tracker
        .track_item(TrackRequest {
            id: "a".into(),
            url: url("a"),
            content: Snapshot::new(),
            images: Snapshot::new(),
            priority: PriorityLevel::Low,
            policy: None,
        })
        .await
        .unwrap();
    tracker
        .update_freshness_status(
            "a",
            FreshnessPatch {
                score: Some(5.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // A writer loads the record, then archiving commits before it writes back.
    let loaded = store.get_freshness("a").await.unwrap().unwrap();
    assert!(!loaded.archived);
    assert_eq!(tracker.archive_stale(0.0).await.unwrap(), 1);
    store.upsert_freshness(&loaded).await.unwrap();

    assert!(store.get_freshness("a").await.unwrap().unwrap().archived);
    assert!(store.stale_records(50.0, 10).await.unwrap().is_empty());
    assert!(store.least_recently_checked(10).await.unwrap().is_empty());

    tracker.record_check("a", Some(200), true).await.unwrap();
    assert!(store.get_freshness("a").await.unwrap().unwrap().archived);
}

#[tokio::test]
async fn test_archive_is_sticky_in_memory() {
    assert_archive_survives_stale_upsert(Arc::new(InMemoryStore::new())).await;
}

// ─── SQLite ─────────────────────────────────────────────────────────

async fn sqlite_store(tmp: &tempfile::TempDir) -> Arc<dyn Store> {
    use content_freshness::store::sqlite::SqliteStore;
    use content_freshness::{db, migrate};

    let pool = db::connect_path(&tmp.path().join("fresh.sqlite"))
        .await
        .unwrap();
    migrate::migrate_pool(&pool).await.unwrap();
    Arc::new(SqliteStore::new(pool))
}

#[tokio::test]
async fn test_archive_is_sticky_in_sqlite() {
    let tmp = tempfile::TempDir::new().unwrap();
    assert_archive_survives_stale_upsert(sqlite_store(&tmp).await).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_claim_has_one_winner() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    let tracker = FreshnessTracker::new(store.clone(), Arc::new(Config::default()));
    tracker
        .track_item(TrackRequest {
            id: "a".into(),
            url: url("a"),
            content: Snapshot::new(),
            images: Snapshot::new(),
            priority: PriorityLevel::Normal,
            policy: None,
        })
        .await
        .unwrap();

    let queue = RefreshQueue::new(store.clone());
    for round in 0..5 {
        let queued = queue
            .schedule("a", RefreshType::Metadata, 5, json!({ "round": round }))
            .await
            .unwrap();

        let workers: Vec<_> = (0..4)
            .map(|w| {
                let queue = queue.clone();
                let id = queued.id.clone();
                tokio::spawn(async move { queue.mark_processing(&id, &format!("w{}", w)).await })
            })
            .collect();
        let mut winners = 0;
        for worker in workers {
            match worker.await.unwrap() {
                Ok(()) => winners += 1,
                Err(Error::Integrity(IntegrityError::ClaimConflict { .. })) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(winners, 1);

        let claimed = queue.get(&queued.id).await.unwrap();
        assert_eq!(claimed.status, QueueStatus::Processing);
        assert!(claimed.worker_id.is_some());

        queue.mark_completed(&queued.id).await.unwrap();
        assert!(matches!(
            queue.mark_completed(&queued.id).await,
            Err(Error::Integrity(IntegrityError::ClaimConflict { .. }))
        ));
    }
}

#[tokio::test]
async fn test_sqlite_end_to_end() {
    use content_freshness::store::sqlite::SqliteStore;
    use content_freshness::{db, migrate};

    let tmp = tempfile::TempDir::new().unwrap();
    let mut settings = Config::default();
    settings.db.path = tmp.path().join("data/fresh.sqlite");
    let pool = db::connect(&settings).await.unwrap();
    migrate::migrate_pool(&pool).await.unwrap();

    let fetcher = Arc::new(StaticFetcher::new());
    let engine = FreshnessEngine::new(EngineParts {
        store: Arc::new(SqliteStore::new(pool)),
        fetcher: fetcher.clone(),
        deriver: None,
        settings,
    });

    engine
        .track_item(TrackRequest {
            id: "a".into(),
            url: url("a"),
            content: snap(json!({ "title": "Old", "tags": ["x", "y"] })),
            images: Snapshot::new(),
            priority: PriorityLevel::Critical,
            policy: Some("news".into()),
        })
        .await
        .unwrap();
    fetcher.set(
        &url("a"),
        snap(json!({ "title": "New", "tags": ["x", "y"] })),
        snap(json!({ "primary": "https://cdn.example.com/b.png" })),
    );

    let check = engine.run_freshness_check(None, &NoProgress).await.unwrap();
    assert_eq!(check.scheduled, 1);
    let run = engine.process_queue(None, "w", &NoProgress).await.unwrap();
    assert_eq!(run.completed, 1);

    let versions = engine.versions().list_versions("a").await.unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[1].metadata_changes, vec!["title"]);
    assert_eq!(versions[1].image_changes, vec!["primary"]);
    assert!((versions[1].change_score - 0.40).abs() < 1e-9);
    assert_eq!(versions[1].content["tags"], json!(["x", "y"]));

    let record = engine.tracker().check_freshness("a").await.unwrap();
    assert_eq!(record.priority, PriorityLevel::Critical);
    assert_eq!(record.policy.as_deref(), Some("news"));
    assert_eq!(record.last_status, Some(200));
    assert_eq!(record.score, 100.0);

    let item = engine.rollback_submission("a", 2).await.unwrap();
    assert_eq!(item.content["title"], json!("New"));
    assert!(matches!(
        engine.rollback_submission("a", 3).await,
        Err(Error::NotFound { .. })
    ));
}
