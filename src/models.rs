//! Core data models used throughout the freshness engine.
//!
//! These types represent the tracked items, their freshness state, queued
//! refresh jobs and the append-only version and history rows that flow
//! through the regeneration pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::snapshot::Snapshot;

/// Scores strictly below this are stale.
pub const STALE_SCORE: f64 = 50.0;

/// Importance of a tracked item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PriorityLevel {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl PriorityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityLevel::Low => "low",
            PriorityLevel::Normal => "normal",
            PriorityLevel::High => "high",
            PriorityLevel::Critical => "critical",
        }
    }

    /// Urgency multiplier of the simplified single-parameter scoring form.
    ///
    /// Not applied by [`staleness_score`](crate::scoring::staleness_score).
    pub fn multiplier(&self) -> f64 {
        match self {
            PriorityLevel::Low => 0.8,
            PriorityLevel::Normal => 1.0,
            PriorityLevel::High => 1.2,
            PriorityLevel::Critical => 1.5,
        }
    }

    /// Sort rank, critical first.
    pub fn rank(&self) -> u8 {
        match self {
            PriorityLevel::Critical => 0,
            PriorityLevel::High => 1,
            PriorityLevel::Normal => 2,
            PriorityLevel::Low => 3,
        }
    }
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriorityLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(PriorityLevel::Low),
            "normal" => Ok(PriorityLevel::Normal),
            "high" => Ok(PriorityLevel::High),
            "critical" => Ok(PriorityLevel::Critical),
            other => Err(Error::validation(format!(
                "unknown priority '{}': must be low, normal, high or critical",
                other
            ))),
        }
    }
}

/// Named freshness configuration, read from the `[[policies]]` config list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreshnessPolicy {
    pub name: String,
    /// Content older than this (since last check) starts losing score.
    pub max_age_hours: f64,
    /// Escalation point; informational for operators.
    pub stale_threshold_hours: f64,
    /// Minimum interval between re-checks of one item.
    pub check_frequency_hours: f64,
}

impl FreshnessPolicy {
    pub fn standard() -> Self {
        Self {
            name: "standard".to_string(),
            max_age_hours: 168.0,
            stale_threshold_hours: 336.0,
            check_frequency_hours: 24.0,
        }
    }
}

/// The current persisted state of a tracked item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentItem {
    pub id: String,
    pub url: String,
    /// Metadata scraped from the source (title, description, ...).
    pub content: Snapshot,
    /// Image data scraped from the source.
    pub images: Snapshot,
    /// Derived representation, produced by a [`ContentDeriver`](crate::fetcher::ContentDeriver).
    pub rewritten: Option<Snapshot>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Freshness state of one tracked item. Owned by the
/// [`FreshnessTracker`](crate::tracker::FreshnessTracker).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FreshnessRecord {
    pub item_id: String,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    /// 0–100, lower is more stale.
    pub score: f64,
    pub is_stale: bool,
    pub priority: PriorityLevel,
    pub last_status: Option<u16>,
    /// Policy name; `None` uses the configured default.
    pub policy: Option<String>,
    /// When the record last crossed from fresh to stale.
    pub stale_since: Option<DateTime<Utc>>,
    pub archived: bool,
}

impl FreshnessRecord {
    pub fn new(item_id: &str, priority: PriorityLevel, policy: Option<String>) -> Self {
        Self {
            item_id: item_id.to_string(),
            last_checked: None,
            last_updated: None,
            score: 100.0,
            is_stale: false,
            priority,
            last_status: None,
            policy,
            stale_since: None,
            archived: false,
        }
    }

    /// Set the score, keeping `is_stale` and `stale_since` consistent.
    pub fn apply_score(&mut self, score: f64, now: DateTime<Utc>) {
        let score = score.clamp(0.0, 100.0);
        let stale = score < STALE_SCORE;
        if stale && !self.is_stale {
            self.stale_since = Some(now);
        } else if !stale {
            self.stale_since = None;
        }
        self.score = score;
        self.is_stale = stale;
    }
}

/// Partial update for a [`FreshnessRecord`]. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct FreshnessPatch {
    pub last_checked: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub score: Option<f64>,
    pub priority: Option<PriorityLevel>,
    pub last_status: Option<u16>,
    pub policy: Option<String>,
}

/// What a queued refresh should re-derive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefreshType {
    #[default]
    Metadata,
    AiRegeneration,
    Validation,
    Full,
}

impl RefreshType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshType::Metadata => "metadata",
            RefreshType::AiRegeneration => "ai_regeneration",
            RefreshType::Validation => "validation",
            RefreshType::Full => "full",
        }
    }
}

impl fmt::Display for RefreshType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefreshType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "metadata" => Ok(RefreshType::Metadata),
            "ai_regeneration" => Ok(RefreshType::AiRegeneration),
            "validation" => Ok(RefreshType::Validation),
            "full" => Ok(RefreshType::Full),
            other => Err(Error::validation(format!(
                "unknown refresh type '{}': must be metadata, ai_regeneration, validation or full",
                other
            ))),
        }
    }
}

/// Queue item lifecycle: `pending → processing → completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }

    /// Whether moving from `self` to `next` respects the lifecycle.
    pub fn can_transition_to(&self, next: QueueStatus) -> bool {
        matches!(
            (self, next),
            (QueueStatus::Pending, QueueStatus::Processing)
                | (QueueStatus::Pending, QueueStatus::Failed)
                | (QueueStatus::Processing, QueueStatus::Completed)
                | (QueueStatus::Processing, QueueStatus::Failed)
        )
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "processing" => Ok(QueueStatus::Processing),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(Error::Store(format!("unknown queue status '{}'", other))),
        }
    }
}

/// A scheduled regeneration job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshQueueItem {
    pub id: String,
    pub item_id: String,
    pub refresh_type: RefreshType,
    /// 1 (serviced first) – 10.
    pub priority: u8,
    pub status: QueueStatus,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub error_message: Option<String>,
    pub error_details: Option<serde_json::Value>,
    pub metadata: serde_json::Value,
}

/// Status update applied through the store's conditional update.
#[derive(Debug, Clone)]
pub enum QueueTransition {
    Processing { worker_id: String },
    Completed,
    Failed {
        message: String,
        details: Option<serde_json::Value>,
    },
}

impl QueueTransition {
    pub fn target(&self) -> QueueStatus {
        match self {
            QueueTransition::Processing { .. } => QueueStatus::Processing,
            QueueTransition::Completed => QueueStatus::Completed,
            QueueTransition::Failed { .. } => QueueStatus::Failed,
        }
    }

    /// Statuses the row must currently hold for the transition to apply.
    pub fn allowed_from(&self) -> &'static [QueueStatus] {
        match self {
            QueueTransition::Processing { .. } => &[QueueStatus::Pending],
            QueueTransition::Completed => &[QueueStatus::Processing],
            QueueTransition::Failed { .. } => &[QueueStatus::Pending, QueueStatus::Processing],
        }
    }
}

/// Why a regeneration ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    #[default]
    Manual,
    Batch,
    RegenerationRequest,
}

impl TriggerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::Manual => "manual",
            TriggerReason::Batch => "batch",
            TriggerReason::RegenerationRequest => "regeneration_request",
        }
    }
}

impl FromStr for TriggerReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(TriggerReason::Manual),
            "batch" => Ok(TriggerReason::Batch),
            "regeneration_request" => Ok(TriggerReason::RegenerationRequest),
            other => Err(Error::validation(format!("unknown trigger reason '{}'", other))),
        }
    }
}

/// Immutable, numbered snapshot of an item's content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentVersion {
    pub item_id: String,
    pub version: i64,
    pub content_hash: String,
    pub rewritten_hash: Option<String>,
    pub images_hash: String,
    /// Content hash of the state this version replaced.
    pub previous_content_hash: Option<String>,
    pub previous_images_hash: Option<String>,
    pub content: Snapshot,
    pub rewritten: Option<Snapshot>,
    pub images: Snapshot,
    pub metadata_changes: Vec<String>,
    pub image_changes: Vec<String>,
    pub change_summary: String,
    pub change_score: f64,
    pub detection_method: String,
    pub processing_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit row for one regeneration attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshHistoryRecord {
    pub id: String,
    pub item_id: String,
    pub success: bool,
    pub changes_found: bool,
    pub content_updated: bool,
    pub old_hash: Option<String>,
    pub new_hash: Option<String>,
    pub duration_ms: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub trigger: TriggerReason,
    pub error: Option<String>,
}

/// Aggregate counts over all tracked items.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FreshnessStatistics {
    pub total: i64,
    pub fresh: i64,
    pub stale: i64,
    pub archived: i64,
    pub never_checked: i64,
    /// Mean score of non-archived records; 0 when there are none.
    pub average_score: f64,
    pub queue_pending: i64,
    pub queue_processing: i64,
    pub queue_completed: i64,
    pub queue_failed: i64,
}
