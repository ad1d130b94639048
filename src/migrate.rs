use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Idempotent.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Current content of each tracked item
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content_items (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            content_json TEXT NOT NULL DEFAULT '{}',
            images_json TEXT NOT NULL DEFAULT '{}',
            rewritten_json TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS freshness_records (
            item_id TEXT PRIMARY KEY,
            last_checked INTEGER,
            last_updated INTEGER,
            score REAL NOT NULL CHECK (score >= 0 AND score <= 100),
            is_stale INTEGER NOT NULL DEFAULT 0,
            priority TEXT NOT NULL DEFAULT 'normal',
            last_status INTEGER,
            policy TEXT,
            stale_since INTEGER,
            archived INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS refresh_queue (
            id TEXT PRIMARY KEY,
            item_id TEXT NOT NULL,
            refresh_type TEXT NOT NULL,
            priority INTEGER NOT NULL CHECK (priority >= 1 AND priority <= 10),
            status TEXT NOT NULL DEFAULT 'pending',
            scheduled_at INTEGER NOT NULL,
            started_at INTEGER,
            completed_at INTEGER,
            worker_id TEXT,
            error_message TEXT,
            error_details TEXT,
            metadata_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only: (item_id, version) is never reused
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content_versions (
            item_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            rewritten_hash TEXT,
            images_hash TEXT NOT NULL,
            previous_content_hash TEXT,
            previous_images_hash TEXT,
            content_json TEXT NOT NULL,
            rewritten_json TEXT,
            images_json TEXT NOT NULL,
            metadata_changes_json TEXT NOT NULL DEFAULT '[]',
            image_changes_json TEXT NOT NULL DEFAULT '[]',
            change_summary TEXT NOT NULL,
            change_score REAL NOT NULL,
            detection_method TEXT NOT NULL,
            processing_ms INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (item_id, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS refresh_history (
            id TEXT PRIMARY KEY,
            item_id TEXT NOT NULL,
            success INTEGER NOT NULL,
            changes_found INTEGER NOT NULL,
            content_updated INTEGER NOT NULL,
            old_hash TEXT,
            new_hash TEXT,
            duration_ms INTEGER NOT NULL,
            started_at INTEGER NOT NULL,
            completed_at INTEGER NOT NULL,
            trigger_reason TEXT NOT NULL,
            error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_freshness_score ON freshness_records(archived, score)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_freshness_checked ON freshness_records(archived, last_checked)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_queue_status ON refresh_queue(status, scheduled_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_queue_item ON refresh_queue(item_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_history_item ON refresh_history(item_id, started_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
