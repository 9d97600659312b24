//! `OrderStore` backed by the `scheduled_orders` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use preorder_core::{OrderId, ScheduledOrder};
use preorder_db::DbError;
use preorder_engine::{OrderStore, StatusUpdate, StoreError};
use sqlx::PgPool;

#[derive(Debug, Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn to_store_error(id: OrderId, target: &'static str, error: DbError) -> StoreError {
    match error {
        DbError::InvalidTransition {
            expected_status, ..
        } => StoreError::Conflict {
            id,
            target,
            reason: format!("not in '{expected_status}' status"),
        },
        other => StoreError::Backend(other.to_string()),
    }
}

fn delivered_count(delivered: u32) -> i32 {
    i32::try_from(delivered).unwrap_or(i32::MAX)
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn due_orders(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledOrder>, StoreError> {
        let rows = preorder_db::list_due_scheduled_orders(&self.pool, now)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        // A corrupt row is skipped rather than blocking every other due order.
        Ok(rows
            .into_iter()
            .filter_map(|row| match ScheduledOrder::try_from(row) {
                Ok(order) => Some(order),
                Err(e) => {
                    tracing::error!(error = %e, "store: skipping unreadable scheduled order");
                    None
                }
            })
            .collect())
    }

    async fn has_any_pending(&self) -> Result<bool, StoreError> {
        preorder_db::has_pending_scheduled_orders(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn update_status(&self, id: OrderId, update: StatusUpdate) -> Result<(), StoreError> {
        let target = update.target();
        let result = match &update {
            StatusUpdate::Processing => {
                preorder_db::mark_scheduled_order_processing(&self.pool, id).await
            }
            StatusUpdate::Completed {
                result_order_id,
                delivered,
            } => {
                preorder_db::complete_scheduled_order(
                    &self.pool,
                    id,
                    result_order_id,
                    delivered_count(*delivered),
                )
                .await
            }
            StatusUpdate::Failed { reason } => {
                preorder_db::fail_scheduled_order(&self.pool, id, reason).await
            }
            StatusUpdate::Cancelled { reason, delivered } => {
                preorder_db::cancel_running_scheduled_order(
                    &self.pool,
                    id,
                    reason,
                    delivered_count(*delivered),
                )
                .await
            }
        };
        result.map_err(|e| to_store_error(id, target, e))
    }

    async fn fail_interrupted(&self, reason: &str) -> Result<u64, StoreError> {
        preorder_db::fail_interrupted_scheduled_orders(&self.pool, reason)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}
