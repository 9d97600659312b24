//! Persistence contract consumed by the scheduler and delivery coordinator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use preorder_core::{OrderId, ScheduledOrder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The record was not in the status the transition requires.
    #[error("scheduled order {id} cannot move to {target}: {reason}")]
    Conflict {
        id: OrderId,
        target: &'static str,
        reason: String,
    },
    #[error("persistence backend error: {0}")]
    Backend(String),
}

/// A status transition written by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    Processing,
    Completed {
        result_order_id: String,
        delivered: u32,
    },
    Failed {
        reason: String,
    },
    Cancelled {
        reason: String,
        delivered: u32,
    },
}

impl StatusUpdate {
    #[must_use]
    pub fn target(&self) -> &'static str {
        match self {
            StatusUpdate::Processing => "processing",
            StatusUpdate::Completed { .. } => "completed",
            StatusUpdate::Failed { .. } => "failed",
            StatusUpdate::Cancelled { .. } => "cancelled",
        }
    }
}

/// Backlog of scheduled orders.
///
/// Implementations must make a write visible to the next read issued by the
/// same process.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Every `pending` order with `due_at <= now`.
    async fn due_orders(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledOrder>, StoreError>;

    /// Whether any order is `pending`, regardless of due time.
    async fn has_any_pending(&self) -> Result<bool, StoreError>;

    async fn update_status(&self, id: OrderId, update: StatusUpdate) -> Result<(), StoreError>;

    /// Fail orders a crashed process left in `processing`; returns how many.
    async fn fail_interrupted(&self, reason: &str) -> Result<u64, StoreError>;
}
