//! `orders` command handlers.
//!
//! Read-only apart from `cancel`, which only touches orders that have not been
//! dispatched yet. Running orders are cancelled through the server so the job
//! sees the request.

use chrono::{DateTime, Utc};
use clap::Subcommand;
use preorder_core::OrderStatus;
use preorder_db::{DbError, ScheduledOrderRow};
use preorder_engine::CANCELLED_BY_USER;

/// Sub-commands available under `orders`.
#[derive(Debug, Subcommand)]
pub enum OrdersCommands {
    /// List recent scheduled orders
    List {
        /// Only show orders in this status (pending, processing, completed, failed, cancelled)
        #[arg(long)]
        status: Option<OrderStatus>,
        /// Maximum number of orders to show
        #[arg(long, default_value = "20")]
        limit: i64,
    },
    /// Show one scheduled order in full
    Show { id: i64 },
    /// Cancel a pending order before it is dispatched
    Cancel { id: i64 },
}

fn fmt_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", text.chars().take(max).collect::<String>())
    } else {
        text.to_owned()
    }
}

fn list_header() -> String {
    format!(
        "{:<8}{:<12}{:<12}{:<18}{:<6}ITEM",
        "ID", "SESSION", "STATUS", "DUE", "QTY"
    )
}

fn list_line(row: &ScheduledOrderRow) -> String {
    let item = format!("{} / {}", row.game_name, row.variant_name);
    format!(
        "{:<8}{:<12}{:<12}{:<18}{:<6}{}",
        row.id,
        row.session_id,
        row.status,
        fmt_time(row.due_at),
        row.quantity,
        truncate(&item, 40)
    )
}

fn detail_lines(row: &ScheduledOrderRow) -> Vec<String> {
    let mut lines = vec![
        format!("Scheduled order #{}", row.id),
        format!("Status:     {}", row.status),
        format!("Owner:      {}", row.owner_id),
        format!("Session:    {}", row.session_id),
        format!("Item:       {} / {}", row.game_name, row.variant_name),
        format!("Quantity:   {}", row.quantity),
        format!("Due:        {}", fmt_time(row.due_at)),
        format!("Created:    {}", fmt_time(row.created_at)),
        format!("Updated:    {}", fmt_time(row.updated_at)),
    ];
    if let Some(url) = &row.game_url {
        lines.push(format!("Game URL:   {url}"));
    }
    if let Some(index) = row.variant_index {
        lines.push(format!("Variant #:  {index}"));
    }
    if let Some(order_id) = &row.result_order_id {
        lines.push(format!("Result:     {order_id}"));
    }
    if let Some(delivered) = row.delivered_count {
        lines.push(format!("Delivered:  {delivered}"));
    }
    if let Some(reason) = &row.failure_reason {
        lines.push(format!("Reason:     {reason}"));
    }
    lines
}

/// Print recent orders as a table.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub(crate) async fn run_orders_list(
    pool: &sqlx::PgPool,
    status: Option<OrderStatus>,
    limit: i64,
) -> anyhow::Result<()> {
    let rows = preorder_db::list_scheduled_orders(pool, status, limit.clamp(1, 500)).await?;

    if rows.is_empty() {
        println!(
            "no scheduled orders found{}",
            status.map(|s| format!(" with status {s}")).unwrap_or_default()
        );
        return Ok(());
    }

    println!("{}", list_header());
    for row in &rows {
        println!("{}", list_line(row));
    }
    Ok(())
}

/// # Errors
///
/// Returns an error if the order does not exist or the query fails.
pub(crate) async fn run_orders_show(pool: &sqlx::PgPool, id: i64) -> anyhow::Result<()> {
    let row = match preorder_db::get_scheduled_order(pool, id).await {
        Ok(row) => row,
        Err(DbError::NotFound) => anyhow::bail!("scheduled order {id} not found"),
        Err(e) => return Err(e.into()),
    };
    for line in detail_lines(&row) {
        println!("{line}");
    }
    Ok(())
}

/// # Errors
///
/// Returns an error if the order is missing, no longer pending, or the update
/// fails.
pub(crate) async fn run_orders_cancel(pool: &sqlx::PgPool, id: i64) -> anyhow::Result<()> {
    match preorder_db::cancel_pending_scheduled_order(pool, id, CANCELLED_BY_USER).await {
        Ok(()) => {
            tracing::info!(order_id = id, "scheduled order cancelled before dispatch");
            println!("scheduled order {id} cancelled");
            Ok(())
        }
        Err(DbError::InvalidTransition { .. }) => {
            let row = preorder_db::get_scheduled_order(pool, id).await.map_err(|e| match e {
                DbError::NotFound => anyhow::anyhow!("scheduled order {id} not found"),
                other => other.into(),
            })?;
            anyhow::bail!(
                "scheduled order {id} is {}; only pending orders can be cancelled",
                row.status
            )
        }
        Err(e) => Err(e.into()),
    }
}
