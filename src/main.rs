//! # Content Freshness CLI (`fresh`)
//!
//! The `fresh` binary tracks content items, scores their freshness,
//! schedules and runs regenerations, and manages version history.
//!
//! ## Usage
//!
//! ```bash
//! fresh --config ./config/fresh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fresh init` | Create the SQLite database and run schema migrations |
//! | `fresh track <id> <url>` | Start tracking an item |
//! | `fresh status <id>` | Show an item's freshness record |
//! | `fresh check` | Score stale and due items, schedule refreshes |
//! | `fresh regenerate <id>...` | Regenerate items now |
//! | `fresh queue list\|add\|process` | Inspect and drain the refresh queue |
//! | `fresh versions <id>` | List recorded versions |
//! | `fresh history <id>` | List regeneration attempts |
//! | `fresh rollback <id> <version>` | Restore content from a version |
//! | `fresh stats` | Freshness and queue overview |
//! | `fresh archive` | Archive long-stale records |
//!
//! Logs go to stderr and are filtered with `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use content_freshness::config::{self, Config};
use content_freshness::engine::{EngineParts, FreshnessEngine};
use content_freshness::fetcher::{HttpFetcher, MetadataFetcher, RetryingFetcher};
use content_freshness::models::{PriorityLevel, QueueStatus, RefreshType, TriggerReason};
use content_freshness::progress::ProgressMode;
use content_freshness::regenerate::RegenerateOptions;
use content_freshness::scoring::round_score;
use content_freshness::snapshot::Snapshot;
use content_freshness::store::sqlite::SqliteStore;
use content_freshness::tracker::TrackRequest;
use content_freshness::{db, migrate, stats};

/// Content Freshness CLI: staleness tracking, change detection and
/// versioned regeneration for externally-sourced content.
#[derive(Parser)]
#[command(name = "fresh", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/fresh.toml")]
    config: PathBuf,

    /// Batch progress on stderr. Defaults to `human` on a TTY, else `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Start tracking an item.
    ///
    /// Fetches the current metadata and images from the URL and records
    /// them as version 1.
    Track {
        id: String,
        url: String,
        /// `low`, `normal`, `high` or `critical`.
        #[arg(long, default_value = "normal")]
        priority: String,
        /// Freshness policy name from `[[policies]]`.
        #[arg(long)]
        policy: Option<String>,
        /// Track with empty snapshots instead of fetching.
        #[arg(long)]
        no_fetch: bool,
    },

    /// Show the freshness record of an item.
    Status { id: String },

    /// Score stale and due items and schedule refreshes for those that need one.
    Check {
        /// Maximum number of items to score.
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Regenerate items immediately.
    Regenerate {
        /// Item ids. With `--stale`, may be omitted.
        ids: Vec<String>,
        /// Also regenerate every currently stale item.
        #[arg(long)]
        stale: bool,
        #[arg(long)]
        concurrency: Option<usize>,
        /// `metadata`, `ai_regeneration`, `validation` or `full`.
        #[arg(long = "type", default_value = "metadata")]
        refresh_type: String,
        /// Do not invoke the content deriver.
        #[arg(long)]
        no_derive: bool,
    },

    /// Inspect and drain the refresh queue.
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// List recorded versions of an item.
    Versions { id: String },

    /// List regeneration attempts for an item, most recent first.
    History {
        id: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Restore an item's content from a recorded version.
    Rollback { id: String, version: i64 },

    /// Show freshness and queue statistics.
    Stats,

    /// Archive records that have been stale for too long.
    Archive {
        /// Defaults to `[freshness] archive_after_hours`.
        #[arg(long)]
        older_than_hours: Option<f64>,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// List queue items, oldest scheduled first.
    List {
        /// `pending`, `processing`, `completed` or `failed`.
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Schedule a refresh by hand.
    Add {
        id: String,
        #[arg(long = "type", default_value = "metadata")]
        refresh_type: String,
        /// 1 (first) to 10.
        #[arg(long, default_value_t = 5)]
        priority: u8,
    },
    /// Claim pending items and regenerate them.
    Process {
        #[arg(long)]
        limit: Option<usize>,
        /// Defaults to `fresh-<pid>`.
        #[arg(long)]
        worker: Option<String>,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_fetcher(cfg: &Config) -> anyhow::Result<Arc<dyn MetadataFetcher>> {
    let http = HttpFetcher::new(&cfg.fetcher)?;
    Ok(Arc::new(RetryingFetcher::new(http, cfg.fetcher.max_retries)))
}

async fn open_engine(cfg: &Config) -> anyhow::Result<FreshnessEngine> {
    let pool = db::connect(cfg).await?;
    migrate::migrate_pool(&pool).await?;
    Ok(FreshnessEngine::new(EngineParts {
        store: Arc::new(SqliteStore::new(pool)),
        fetcher: build_fetcher(cfg)?,
        deriver: None,
        settings: cfg.clone(),
    }))
}

fn fmt_time(ts: Option<chrono::DateTime<chrono::Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;
    let progress = cli
        .progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let engine = open_engine(&cfg).await?;

    match cli.command {
        Commands::Init => {}
        Commands::Track {
            id,
            url,
            priority,
            policy,
            no_fetch,
        } => {
            let priority: PriorityLevel = priority.parse()?;
            let (content, images) = if no_fetch {
                (Snapshot::new(), Snapshot::new())
            } else {
                let fetcher = build_fetcher(&cfg)?;
                let (content, images) =
                    tokio::join!(fetcher.fetch_metadata(&url), fetcher.fetch_images(&url));
                (
                    content.with_context(|| format!("fetching metadata for {}", url))?,
                    images.with_context(|| format!("fetching images for {}", url))?,
                )
            };
            let record = engine
                .track_item(TrackRequest {
                    id,
                    url,
                    content,
                    images,
                    priority,
                    policy,
                })
                .await?;
            println!(
                "Tracking {} (score {:.2}, priority {})",
                record.item_id,
                round_score(record.score),
                record.priority
            );
        }
        Commands::Status { id } => {
            let record = engine.tracker().check_freshness(&id).await?;
            let policy = engine.tracker().policy_for(&record);
            println!("Item:          {}", record.item_id);
            println!("Score:         {:.2}", round_score(record.score));
            println!(
                "State:         {}",
                if record.archived {
                    "archived"
                } else if record.is_stale {
                    "stale"
                } else {
                    "fresh"
                }
            );
            println!("Priority:      {}", record.priority);
            println!("Policy:        {}", policy.name);
            println!("Last checked:  {}", fmt_time(record.last_checked));
            println!("Last updated:  {}", fmt_time(record.last_updated));
            println!(
                "Last status:   {}",
                record
                    .last_status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
        }
        Commands::Check { batch_size } => {
            let summary = engine
                .run_freshness_check(batch_size, progress.as_ref())
                .await?;
            println!(
                "Checked {} items: {} stale, {} scheduled, {} already queued, {} errors",
                summary.checked,
                summary.stale,
                summary.scheduled,
                summary.already_queued,
                summary.errors.len()
            );
            for e in &summary.errors {
                println!("  {}: {}", e.item_id, e.error);
            }
        }
        Commands::Regenerate {
            mut ids,
            stale,
            concurrency,
            refresh_type,
            no_derive,
        } => {
            if stale {
                for record in engine.get_stale_items(None).await? {
                    if !ids.contains(&record.item_id) {
                        ids.push(record.item_id);
                    }
                }
            }
            if ids.is_empty() {
                anyhow::bail!("no items to regenerate: pass item ids or --stale");
            }
            let options = RegenerateOptions {
                refresh_type: refresh_type.parse::<RefreshType>()?,
                trigger: TriggerReason::Manual,
                update_rewritten_content: !no_derive,
            };

            if let [id] = ids.as_slice() {
                let result = engine.regenerate(id, &options).await?;
                match result.version {
                    Some(v) => println!(
                        "{}: version {} (score {:.2}{})",
                        id,
                        v,
                        result.change_score,
                        if result.significant_changes {
                            ", significant"
                        } else {
                            ""
                        }
                    ),
                    None => println!("{}: no changes", id),
                }
            } else {
                let batch = engine
                    .batch_regenerate(&ids, concurrency, &options, progress.as_ref())
                    .await;
                println!(
                    "Processed {} items in {} ms: {} ok, {} failed, {} changed ({} significant)",
                    batch.total_processed,
                    batch.processing_time_ms,
                    batch.successful,
                    batch.failed,
                    batch.changes_detected,
                    batch.significant_changes
                );
                for e in &batch.errors {
                    println!("  {}: {}", e.item_id, e.error);
                }
            }
        }
        Commands::Queue { action } => match action {
            QueueAction::List { status, limit } => {
                let status = status.map(|s| s.parse::<QueueStatus>()).transpose()?;
                let items = engine.queue().list(status, limit).await?;
                if items.is_empty() {
                    println!("Queue is empty.");
                }
                for q in items {
                    println!(
                        "{}  {:<10}  p{:<2}  {:<15}  {}  {}",
                        q.id,
                        q.status.as_str(),
                        q.priority,
                        q.refresh_type.as_str(),
                        q.item_id,
                        q.error_message.unwrap_or_default()
                    );
                }
            }
            QueueAction::Add {
                id,
                refresh_type,
                priority,
            } => {
                let item = engine
                    .queue()
                    .schedule(
                        &id,
                        refresh_type.parse::<RefreshType>()?,
                        priority,
                        serde_json::json!({ "reason": "manual" }),
                    )
                    .await?;
                println!("Scheduled {} for {}", item.id, item.item_id);
            }
            QueueAction::Process { limit, worker } => {
                let worker = worker.unwrap_or_else(|| format!("fresh-{}", std::process::id()));
                let summary = engine
                    .process_queue(limit, &worker, progress.as_ref())
                    .await?;
                println!(
                    "Claimed {}: {} completed, {} failed, {} skipped",
                    summary.claimed, summary.completed, summary.failed, summary.skipped
                );
                for e in &summary.errors {
                    println!("  {}: {}", e.item_id, e.error);
                }
            }
        },
        Commands::Versions { id } => {
            let versions = engine.versions().list_versions(&id).await?;
            if versions.is_empty() {
                println!("No versions recorded for {}.", id);
            }
            for v in versions {
                println!(
                    "v{:<4} {}  score {:.2}  {}",
                    v.version,
                    v.created_at.format("%Y-%m-%d %H:%M:%S"),
                    v.change_score,
                    v.change_summary
                );
            }
        }
        Commands::History { id, limit } => {
            for h in engine.versions().list_history(&id, limit).await? {
                println!(
                    "{}  {:<20}  {:<7}  {:>6} ms  {}",
                    h.started_at.format("%Y-%m-%d %H:%M:%S"),
                    h.trigger.as_str(),
                    if h.success { "ok" } else { "failed" },
                    h.duration_ms,
                    h.error.unwrap_or_else(|| {
                        if h.content_updated {
                            "content updated".to_string()
                        } else {
                            String::new()
                        }
                    })
                );
            }
        }
        Commands::Rollback { id, version } => {
            engine.rollback_submission(&id, version).await?;
            println!("Rolled back {} to version {}.", id, version);
        }
        Commands::Stats => {
            let statistics = engine.get_freshness_statistics().await?;
            stats::print_stats(&cfg, &statistics);
        }
        Commands::Archive { older_than_hours } => {
            let archived = engine.archive_stale(older_than_hours).await?;
            println!("Archived {} records.", archived);
        }
    }

    Ok(())
}
