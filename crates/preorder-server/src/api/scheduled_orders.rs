//! Scheduled order intake and inspection.
//!
//! - `POST   /api/v1/scheduled-orders`: create a pending order
//! - `GET    /api/v1/scheduled-orders`: recent orders, `?status=&limit=`
//! - `GET    /api/v1/scheduled-orders/{id}`: one order
//! - `DELETE /api/v1/scheduled-orders/{id}`: cancel an order not yet dispatched

use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use preorder_core::{ItemSpec, OrderStatus};
use preorder_db::{DbError, NewScheduledOrder, ScheduledOrderRow};
use preorder_engine::CANCELLED_BY_USER;
use serde::{Deserialize, Serialize};

use crate::middleware::RequestId;

use super::{map_db_error, normalize_limit, ApiError, ApiResponse, AppState, ResponseMeta};

const MAX_QUANTITY: i32 = 500;
const WAKE_RETRY: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(super) struct CreateScheduledOrderRequest {
    pub owner_id: i64,
    pub session_id: i64,
    pub game_name: String,
    pub game_url: Option<String>,
    pub variant_name: String,
    pub variant_index: Option<i32>,
    pub quantity: i32,
    /// Omitted means "as soon as possible".
    pub due_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ScheduledOrdersQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(super) struct ScheduledOrderItem {
    id: i64,
    owner_id: i64,
    session_id: i64,
    game_name: String,
    game_url: Option<String>,
    variant_name: String,
    variant_index: Option<i32>,
    quantity: i32,
    status: String,
    due_at: DateTime<Utc>,
    result_order_id: Option<String>,
    failure_reason: Option<String>,
    delivered_count: Option<i32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ScheduledOrderRow> for ScheduledOrderItem {
    fn from(row: ScheduledOrderRow) -> Self {
        Self {
            id: row.id,
            owner_id: row.owner_id,
            session_id: row.session_id,
            game_name: row.game_name,
            game_url: row.game_url,
            variant_name: row.variant_name,
            variant_index: row.variant_index,
            quantity: row.quantity,
            status: row.status,
            due_at: row.due_at,
            result_order_id: row.result_order_id,
            failure_reason: row.failure_reason,
            delivered_count: row.delivered_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

fn required_text(req_id: &str, field: &str, value: &str) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() > 200 {
        return Err(ApiError::new(
            req_id,
            "validation_error",
            format!("{field} must be 1-200 characters"),
        ));
    }
    Ok(trimmed.to_owned())
}

fn validate_create(
    req_id: &str,
    body: CreateScheduledOrderRequest,
    now: DateTime<Utc>,
) -> Result<NewScheduledOrder, ApiError> {
    if !(1..=MAX_QUANTITY).contains(&body.quantity) {
        return Err(ApiError::new(
            req_id,
            "validation_error",
            format!("quantity must be between 1 and {MAX_QUANTITY}, got {}", body.quantity),
        ));
    }
    if body.variant_index.is_some_and(|i| i < 0) {
        return Err(ApiError::new(
            req_id,
            "validation_error",
            "variant_index must not be negative",
        ));
    }
    let game_name = required_text(req_id, "game_name", &body.game_name)?;
    let variant_name = required_text(req_id, "variant_name", &body.variant_name)?;
    let game_url = match body.game_url.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(url) => Some(parse_http_url(req_id, url)?),
    };

    Ok(NewScheduledOrder {
        owner_id: body.owner_id,
        session_id: body.session_id,
        item: ItemSpec {
            game_name,
            game_url,
            variant_name,
            variant_index: body.variant_index,
        },
        quantity: body.quantity,
        due_at: body.due_at.unwrap_or(now),
    })
}

/// Parse a URL and accept only http(s) schemes.
fn parse_http_url(req_id: &str, value: &str) -> Result<String, ApiError> {
    match reqwest::Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url.into()),
        _ => Err(ApiError::new(
            req_id,
            "validation_error",
            format!("'game_url' must be an http(s) URL, got '{value}'"),
        )),
    }
}

fn parse_status(req_id: &str, raw: Option<&str>) -> Result<Option<OrderStatus>, ApiError> {
    raw.map(|s| {
        s.parse::<OrderStatus>().map_err(|_| {
            ApiError::new(
                req_id,
                "validation_error",
                format!(
                    "status must be one of pending, processing, completed, failed, cancelled; got '{s}'"
                ),
            )
        })
    })
    .transpose()
}

fn map_lookup_error(req_id: &str, id: i64, e: &DbError) -> ApiError {
    if matches!(e, DbError::NotFound) {
        return ApiError::new(req_id, "not_found", format!("scheduled order {id} not found"));
    }
    map_db_error(req_id.to_owned(), e)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/scheduled-orders - persist a pending order and wake the poll loop.
pub(super) async fn create_scheduled_order(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<CreateScheduledOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ScheduledOrderItem>>), ApiError> {
    let rid = &req_id.0;
    let new = validate_create(rid, body, Utc::now())?;

    let row = preorder_db::create_scheduled_order(&state.pool, &new)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    tracing::info!(
        order_id = row.id,
        session_id = row.session_id,
        due_at = %row.due_at,
        "scheduled order created"
    );

    // The row is already committed; keep trying until the loop is up.
    if let Err(e) = state.scheduler.wake().await {
        tracing::warn!(order_id = row.id, error = %e, "failed to wake scheduler; retrying");
        state.scheduler.wake_until_active(WAKE_RETRY);
    }

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse {
            data: row.into(),
            meta: ResponseMeta::new(req_id.0),
        }),
    ))
}

/// GET /api/v1/scheduled-orders
pub(super) async fn list_scheduled_orders(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<ScheduledOrdersQuery>,
) -> Result<Json<ApiResponse<Vec<ScheduledOrderItem>>>, ApiError> {
    let status = parse_status(&req_id.0, query.status.as_deref())?;
    let rows =
        preorder_db::list_scheduled_orders(&state.pool, status, normalize_limit(query.limit))
            .await
            .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: rows.into_iter().map(Into::into).collect(),
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// GET /api/v1/scheduled-orders/{id}
pub(super) async fn get_scheduled_order(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<ScheduledOrderItem>>, ApiError> {
    let row = preorder_db::get_scheduled_order(&state.pool, id)
        .await
        .map_err(|e| map_lookup_error(&req_id.0, id, &e))?;

    Ok(Json(ApiResponse {
        data: row.into(),
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// DELETE /api/v1/scheduled-orders/{id} - cancel before dispatch.
///
/// A running order is cancelled through its session instead.
pub(super) async fn cancel_scheduled_order(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<ScheduledOrderItem>>, ApiError> {
    let rid = &req_id.0;
    match preorder_db::cancel_pending_scheduled_order(&state.pool, id, CANCELLED_BY_USER).await {
        Ok(()) => {}
        Err(DbError::InvalidTransition { .. }) => {
            let row = preorder_db::get_scheduled_order(&state.pool, id)
                .await
                .map_err(|e| map_lookup_error(rid, id, &e))?;
            return Err(ApiError::new(
                rid,
                "conflict",
                format!(
                    "scheduled order {id} is {}; only pending orders can be cancelled here",
                    row.status
                ),
            ));
        }
        Err(e) => return Err(map_db_error(rid.clone(), &e)),
    }
    tracing::info!(order_id = id, "scheduled order cancelled before dispatch");

    let row = preorder_db::get_scheduled_order(&state.pool, id)
        .await
        .map_err(|e| map_lookup_error(rid, id, &e))?;
    Ok(Json(ApiResponse {
        data: row.into(),
        meta: ResponseMeta::new(req_id.0),
    }))
}
