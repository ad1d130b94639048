//! Durable refresh work queue.
//!
//! Items move `pending → processing → completed | failed` and never move
//! back. Claiming an item for a worker is a single conditional update in the
//! store, so when two workers race for the same item exactly one wins; the
//! loser gets [`IntegrityError::ClaimConflict`], which is retryable.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::error::{Error, IntegrityError, Result};
use crate::models::{QueueStatus, QueueTransition, RefreshQueueItem, RefreshType};
use crate::store::Store;

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;

/// Queue priority for a staleness score: the staler, the sooner.
pub fn priority_for_score(score: f64) -> u8 {
    if score < 20.0 {
        1
    } else if score < 40.0 {
        3
    } else if score < 60.0 {
        5
    } else if score < 80.0 {
        7
    } else {
        9
    }
}

#[derive(Clone)]
pub struct RefreshQueue {
    store: Arc<dyn Store>,
}

impl RefreshQueue {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Enqueue a pending refresh for a tracked item.
    pub async fn schedule(
        &self,
        item_id: &str,
        refresh_type: RefreshType,
        priority: u8,
        metadata: Value,
    ) -> Result<RefreshQueueItem> {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(Error::validation(format!(
                "queue priority must be between {} and {}, got {}",
                MIN_PRIORITY, MAX_PRIORITY, priority
            )));
        }
        if self.store.get_item(item_id).await?.is_none() {
            return Err(Error::not_found("item", item_id));
        }

        let item = RefreshQueueItem {
            id: uuid::Uuid::new_v4().to_string(),
            item_id: item_id.to_string(),
            refresh_type,
            priority,
            status: QueueStatus::Pending,
            scheduled_at: Utc::now(),
            started_at: None,
            completed_at: None,
            worker_id: None,
            error_message: None,
            error_details: None,
            metadata,
        };
        self.store.insert_queue_item(&item).await?;
        tracing::debug!(
            queue_id = %item.id,
            item_id,
            refresh_type = %refresh_type,
            priority,
            "refresh scheduled"
        );
        Ok(item)
    }

    /// Schedule with a priority derived from `score`. Returns `None` when
    /// the item already has a pending or processing entry.
    pub async fn schedule_for_score(
        &self,
        item_id: &str,
        score: f64,
        refresh_type: RefreshType,
        reason: &str,
    ) -> Result<Option<RefreshQueueItem>> {
        if let Some(open) = self.store.open_queue_item_for(item_id).await? {
            tracing::debug!(item_id, queue_id = %open.id, "refresh already queued");
            return Ok(None);
        }
        let metadata = serde_json::json!({
            "reason": reason,
            "score": score,
        });
        self.schedule(item_id, refresh_type, priority_for_score(score), metadata)
            .await
            .map(Some)
    }

    /// Pending items, oldest scheduled first. Does not change their status.
    pub async fn claim(&self, limit: usize) -> Result<Vec<RefreshQueueItem>> {
        self.store.list_queue(Some(QueueStatus::Pending), limit).await
    }

    pub async fn list(
        &self,
        status: Option<QueueStatus>,
        limit: usize,
    ) -> Result<Vec<RefreshQueueItem>> {
        self.store.list_queue(status, limit).await
    }

    pub async fn get(&self, id: &str) -> Result<RefreshQueueItem> {
        self.store
            .get_queue_item(id)
            .await?
            .ok_or_else(|| Error::not_found("queue item", id))
    }

    /// Take ownership of a pending item. Fails with a claim conflict if
    /// another worker got there first.
    pub async fn mark_processing(&self, id: &str, worker_id: &str) -> Result<()> {
        self.transition(
            id,
            QueueTransition::Processing {
                worker_id: worker_id.to_string(),
            },
        )
        .await
    }

    pub async fn mark_completed(&self, id: &str) -> Result<()> {
        self.transition(id, QueueTransition::Completed).await
    }

    pub async fn mark_failed(&self, id: &str, message: &str, details: Option<Value>) -> Result<()> {
        self.transition(
            id,
            QueueTransition::Failed {
                message: message.to_string(),
                details,
            },
        )
        .await
    }

    async fn transition(&self, id: &str, transition: QueueTransition) -> Result<()> {
        if self
            .store
            .transition_queue_item(id, &transition, Utc::now())
            .await?
        {
            tracing::debug!(queue_id = id, status = %transition.target(), "queue transition");
            return Ok(());
        }

        // Distinguish a missing row from a lost race.
        self.get(id).await?;
        let expected = transition
            .allowed_from()
            .iter()
            .map(QueueStatus::as_str)
            .collect::<Vec<_>>()
            .join(" or ");
        Err(IntegrityError::ClaimConflict {
            queue_id: id.to_string(),
            expected,
        }
        .into())
    }
}
