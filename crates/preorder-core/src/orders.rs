use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CoreError;

pub type OrderId = i64;
pub type OwnerId = i64;
/// Channel the job reports to (a chat id for the Telegram messenger).
pub type SessionId = i64;

/// Marker stored in [`PinRecord::code`] for a unit that could not be purchased.
pub const FAILED_CODE: &str = "FAILED";

/// Lifecycle state of a [`ScheduledOrder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl OrderStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Failed | OrderStatus::Cancelled
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "completed" => Ok(OrderStatus::Completed),
            "failed" => Ok(OrderStatus::Failed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(CoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// What to buy: the product on the storefront and which denomination of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSpec {
    pub game_name: String,
    pub game_url: Option<String>,
    pub variant_name: String,
    pub variant_index: Option<i32>,
}

/// A persisted "buy this later" record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledOrder {
    pub id: OrderId,
    pub owner_id: OwnerId,
    pub session_id: SessionId,
    pub item: ItemSpec,
    pub quantity: u32,
    pub status: OrderStatus,
    pub due_at: DateTime<Utc>,
    pub result_order_id: Option<String>,
    pub failure_reason: Option<String>,
}

impl ScheduledOrder {
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == OrderStatus::Pending && self.due_at <= now
    }
}

/// One purchased unit (or one failed attempt, see [`FAILED_CODE`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinRecord {
    pub code: String,
    pub serial_number: Option<String>,
    pub stage: Option<String>,
    pub error: Option<String>,
    pub transaction_id: Option<String>,
}

impl PinRecord {
    #[must_use]
    pub fn redeemed(code: impl Into<String>, serial_number: Option<String>) -> Self {
        Self {
            code: code.into(),
            serial_number,
            stage: None,
            error: None,
            transaction_id: None,
        }
    }

    #[must_use]
    pub fn failed(stage: Option<String>, error: impl Into<String>) -> Self {
        Self {
            code: FAILED_CODE.to_string(),
            serial_number: None,
            stage,
            error: Some(error.into()),
            transaction_id: None,
        }
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.code == FAILED_CODE
    }
}

/// Outcome of one execution-engine run, complete or partial.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Storefront-side order id; empty when the engine never got that far.
    pub order_id: String,
    pub cards_count: u32,
    pub completed_purchases: u32,
    pub pins: Vec<PinRecord>,
}

impl ExecutionResult {
    /// A result with nothing accounted for, sized to the requested quantity.
    #[must_use]
    pub fn empty(cards_count: u32) -> Self {
        Self {
            cards_count,
            ..Self::default()
        }
    }

    pub fn valid_pins(&self) -> impl Iterator<Item = &PinRecord> {
        self.pins.iter().filter(|p| !p.is_failed())
    }

    #[must_use]
    pub fn valid_count(&self) -> usize {
        self.valid_pins().count()
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.pins.iter().filter(|p| p.is_failed()).count()
    }

    /// Units never attempted: `cards_count - completed_purchases`.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.cards_count.saturating_sub(self.completed_purchases)
    }
}
