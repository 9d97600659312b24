//! Database operations for `scheduled_orders`.
//!
//! Status transitions are guarded in SQL: each `UPDATE` only matches rows in
//! the expected source status, and a miss is reported as
//! [`DbError::InvalidTransition`].

use chrono::{DateTime, Utc};
use preorder_core::{ItemSpec, OrderStatus, ScheduledOrder};
use sqlx::PgPool;

use crate::DbError;

const COLUMNS: &str = "id, owner_id, session_id, game_name, game_url, variant_name, \
                       variant_index, quantity, status, due_at, result_order_id, \
                       failure_reason, delivered_count, created_at, updated_at";

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `scheduled_orders` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScheduledOrderRow {
    pub id: i64,
    pub owner_id: i64,
    pub session_id: i64,
    pub game_name: String,
    pub game_url: Option<String>,
    pub variant_name: String,
    pub variant_index: Option<i32>,
    /// `CHECK (quantity > 0)` in the schema.
    pub quantity: i32,
    pub status: String,
    pub due_at: DateTime<Utc>,
    pub result_order_id: Option<String>,
    pub failure_reason: Option<String>,
    pub delivered_count: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ScheduledOrderRow> for ScheduledOrder {
    type Error = DbError;

    fn try_from(row: ScheduledOrderRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<OrderStatus>()
            .map_err(|e| DbError::CorruptRow {
                id: row.id,
                reason: e.to_string(),
            })?;
        let quantity = u32::try_from(row.quantity).map_err(|_| DbError::CorruptRow {
            id: row.id,
            reason: format!("negative quantity {}", row.quantity),
        })?;

        Ok(ScheduledOrder {
            id: row.id,
            owner_id: row.owner_id,
            session_id: row.session_id,
            item: ItemSpec {
                game_name: row.game_name,
                game_url: row.game_url,
                variant_name: row.variant_name,
                variant_index: row.variant_index,
            },
            quantity,
            status,
            due_at: row.due_at,
            result_order_id: row.result_order_id,
            failure_reason: row.failure_reason,
        })
    }
}

/// Input for [`create_scheduled_order`].
#[derive(Debug, Clone)]
pub struct NewScheduledOrder {
    pub owner_id: i64,
    pub session_id: i64,
    pub item: ItemSpec,
    pub quantity: i32,
    pub due_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Intake and reads
// ---------------------------------------------------------------------------

/// Inserts a new scheduled order in `pending` status and returns the full row.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails (including the
/// `quantity > 0` check constraint).
pub async fn create_scheduled_order(
    pool: &PgPool,
    new: &NewScheduledOrder,
) -> Result<ScheduledOrderRow, DbError> {
    let row = sqlx::query_as::<_, ScheduledOrderRow>(&format!(
        "INSERT INTO scheduled_orders \
             (owner_id, session_id, game_name, game_url, variant_name, variant_index, \
              quantity, status, due_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8) \
         RETURNING {COLUMNS}"
    ))
    .bind(new.owner_id)
    .bind(new.session_id)
    .bind(&new.item.game_name)
    .bind(new.item.game_url.as_deref())
    .bind(&new.item.variant_name)
    .bind(new.item.variant_index)
    .bind(new.quantity)
    .bind(new.due_at)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetches a single scheduled order by id.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists, or [`DbError::Sqlx`] if the
/// query fails.
pub async fn get_scheduled_order(pool: &PgPool, id: i64) -> Result<ScheduledOrderRow, DbError> {
    sqlx::query_as::<_, ScheduledOrderRow>(&format!(
        "SELECT {COLUMNS} FROM scheduled_orders WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Returns the most recent `limit` orders, optionally filtered by status.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_scheduled_orders(
    pool: &PgPool,
    status: Option<OrderStatus>,
    limit: i64,
) -> Result<Vec<ScheduledOrderRow>, DbError> {
    let rows = sqlx::query_as::<_, ScheduledOrderRow>(&format!(
        "SELECT {COLUMNS} FROM scheduled_orders \
         WHERE ($1::TEXT IS NULL OR status = $1) \
         ORDER BY created_at DESC, id DESC \
         LIMIT $2"
    ))
    .bind(status.map(OrderStatus::as_str))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns every `pending` order whose `due_at` is at or before `now`,
/// oldest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_due_scheduled_orders(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> Result<Vec<ScheduledOrderRow>, DbError> {
    let rows = sqlx::query_as::<_, ScheduledOrderRow>(&format!(
        "SELECT {COLUMNS} FROM scheduled_orders \
         WHERE status = 'pending' AND due_at <= $1 \
         ORDER BY due_at ASC, id ASC"
    ))
    .bind(now)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns `true` if any order is `pending`, due or not.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn has_pending_scheduled_orders(pool: &PgPool) -> Result<bool, DbError> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM scheduled_orders WHERE status = 'pending')",
    )
    .fetch_one(pool)
    .await?;

    Ok(exists)
}

// ---------------------------------------------------------------------------
// Status transitions
// ---------------------------------------------------------------------------

fn ensure_transitioned(
    result: &sqlx::postgres::PgQueryResult,
    id: i64,
    expected_status: &'static str,
) -> Result<(), DbError> {
    if result.rows_affected() == 0 {
        return Err(DbError::InvalidTransition {
            id,
            expected_status,
        });
    }
    Ok(())
}

/// Marks a pending order as `processing`.
///
/// # Errors
///
/// Returns [`DbError::InvalidTransition`] if the order is not `pending`, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn mark_scheduled_order_processing(pool: &PgPool, id: i64) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE scheduled_orders SET status = 'processing', updated_at = NOW() \
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(id)
    .execute(pool)
    .await?;

    ensure_transitioned(&result, id, "pending")
}

/// Marks a processing order as `completed` and records its residue.
///
/// # Errors
///
/// Returns [`DbError::InvalidTransition`] if the order is not `processing`, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn complete_scheduled_order(
    pool: &PgPool,
    id: i64,
    result_order_id: &str,
    delivered_count: i32,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE scheduled_orders \
         SET status = 'completed', result_order_id = $1, delivered_count = $2, \
             failure_reason = NULL, updated_at = NOW() \
         WHERE id = $3 AND status = 'processing'",
    )
    .bind(result_order_id)
    .bind(delivered_count)
    .bind(id)
    .execute(pool)
    .await?;

    ensure_transitioned(&result, id, "processing")
}

/// Marks a processing order as `failed` with `reason`.
///
/// # Errors
///
/// Returns [`DbError::InvalidTransition`] if the order is not `processing`, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn fail_scheduled_order(pool: &PgPool, id: i64, reason: &str) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE scheduled_orders \
         SET status = 'failed', failure_reason = $1, updated_at = NOW() \
         WHERE id = $2 AND status = 'processing'",
    )
    .bind(reason)
    .bind(id)
    .execute(pool)
    .await?;

    ensure_transitioned(&result, id, "processing")
}

/// Marks a processing order as `cancelled`, keeping whatever was delivered.
///
/// # Errors
///
/// Returns [`DbError::InvalidTransition`] if the order is not `processing`, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn cancel_running_scheduled_order(
    pool: &PgPool,
    id: i64,
    reason: &str,
    delivered_count: i32,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE scheduled_orders \
         SET status = 'cancelled', failure_reason = $1, delivered_count = $2, \
             updated_at = NOW() \
         WHERE id = $3 AND status = 'processing'",
    )
    .bind(reason)
    .bind(delivered_count)
    .bind(id)
    .execute(pool)
    .await?;

    ensure_transitioned(&result, id, "processing")
}

/// Cancels an order that has not been dispatched yet.
///
/// # Errors
///
/// Returns [`DbError::InvalidTransition`] if the order is no longer `pending`,
/// or [`DbError::Sqlx`] if the update fails.
pub async fn cancel_pending_scheduled_order(
    pool: &PgPool,
    id: i64,
    reason: &str,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE scheduled_orders \
         SET status = 'cancelled', failure_reason = $1, updated_at = NOW() \
         WHERE id = $2 AND status = 'pending'",
    )
    .bind(reason)
    .bind(id)
    .execute(pool)
    .await?;

    ensure_transitioned(&result, id, "pending")
}

/// Fails every order left in `processing` by a previous process.
///
/// Returns the number of rows updated.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn fail_interrupted_scheduled_orders(
    pool: &PgPool,
    reason: &str,
) -> Result<u64, DbError> {
    let result = sqlx::query(
        "UPDATE scheduled_orders \
         SET status = 'failed', failure_reason = $1, updated_at = NOW() \
         WHERE status = 'processing'",
    )
    .bind(reason)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
