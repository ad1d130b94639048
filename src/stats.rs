//! Freshness statistics overview.
//!
//! Used by `fresh stats` to give a quick picture of how fresh the tracked
//! content is and how much refresh work is outstanding.

use crate::config::Config;
use crate::models::FreshnessStatistics;
use crate::progress::format_number;

fn count(n: i64) -> String {
    format_number(u64::try_from(n).unwrap_or(0))
}

fn percent(part: i64, whole: i64) -> i64 {
    if whole > 0 {
        (part * 100) / whole
    } else {
        0
    }
}

/// Print a summary of `stats` to stdout.
pub fn print_stats(config: &Config, stats: &FreshnessStatistics) {
    let active = stats.fresh + stats.stale;

    println!("Content Freshness — Statistics");
    println!("==============================");
    println!();
    println!("  Database:       {}", config.db.path.display());
    println!();
    println!("  Tracked:        {}", count(stats.total));
    println!(
        "  Fresh:          {} ({}%)",
        count(stats.fresh),
        percent(stats.fresh, active)
    );
    println!(
        "  Stale:          {} ({}%)",
        count(stats.stale),
        percent(stats.stale, active)
    );
    println!("  Archived:       {}", count(stats.archived));
    println!("  Never checked:  {}", count(stats.never_checked));
    println!("  Average score:  {:.2}", stats.average_score);
    println!();
    println!("  Refresh queue:");
    println!("    pending       {}", count(stats.queue_pending));
    println!("    processing    {}", count(stats.queue_processing));
    println!("    completed     {}", count(stats.queue_completed));
    println!("    failed        {}", count(stats.queue_failed));
}
