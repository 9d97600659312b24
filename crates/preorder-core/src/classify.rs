//! Maps execution-engine faults onto the fixed catalog of user-facing errors.
//!
//! Classification looks at the fault's explicit category code first. When the
//! code is absent or not one we know, the message text is matched
//! case-insensitively against keyword groups in [`KEYWORD_PRIORITY`] order and
//! the first group that matches wins.
//!
//! Cancellation is not an error: a message matching "cancelled by user" is
//! never classified, and callers are expected to branch on cancellation before
//! reaching this module.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A hard failure reported by the execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFault {
    /// Engine-supplied category code such as `SESSION_EXPIRED`.
    pub code: Option<String>,
    pub message: String,
    /// Automation stage the engine was in when it gave up.
    pub stage: Option<String>,
}

impl JobFault {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            stage: None,
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        is_cancellation_message(&self.message)
    }
}

impl fmt::Display for JobFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.stage {
            Some(stage) => write!(f, "{} (stage: {stage})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCategory {
    SessionExpired,
    InvalidBackupCode,
    StockUnavailable,
    Network,
    PaymentMethodMissing,
    TwoFactor,
    PurchaseFailed,
}

impl FromStr for FaultCategory {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SESSION_EXPIRED" => Ok(Self::SessionExpired),
            "INVALID_BACKUP_CODE" => Ok(Self::InvalidBackupCode),
            "OUT_OF_STOCK" | "STOCK_UNAVAILABLE" => Ok(Self::StockUnavailable),
            "NETWORK_ERROR" | "TIMEOUT" => Ok(Self::Network),
            "NO_PAYMENT_METHOD" | "PAYMENT_METHOD_MISSING" => Ok(Self::PaymentMethodMissing),
            "TWO_FACTOR_FAILED" | "2FA_FAILED" => Ok(Self::TwoFactor),
            "PURCHASE_FAILED" => Ok(Self::PurchaseFailed),
            _ => Err(()),
        }
    }
}

/// Keyword groups checked against the lowercased message, highest priority first.
pub const KEYWORD_PRIORITY: &[(FaultCategory, &[&str])] = &[
    (FaultCategory::SessionExpired, &["session", "expired"]),
    (FaultCategory::InvalidBackupCode, &["backup"]),
    (FaultCategory::StockUnavailable, &["stock", "unavailable"]),
    (FaultCategory::Network, &["network", "timeout", "timed out"]),
    (FaultCategory::PaymentMethodMissing, &["payment method"]),
    (FaultCategory::TwoFactor, &["2fa", "two-factor", "two factor"]),
];

/// User-facing error categories with their message catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserError {
    SessionExpired,
    InvalidBackupCode,
    StockUnavailable,
    Network,
    PaymentMethodMissing,
    TwoFactor,
    PurchaseFailed { reason: String },
    Generic { message: String },
}

impl UserError {
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            UserError::SessionExpired => {
                "🔐 Your storefront session has expired. Please log in again and reschedule the order."
                    .to_string()
            }
            UserError::InvalidBackupCode => {
                "🔑 The backup code was rejected (invalid or already used). Please provide a fresh backup code."
                    .to_string()
            }
            UserError::StockUnavailable => {
                "📦 The selected item is out of stock or unavailable right now.".to_string()
            }
            UserError::Network => {
                "🌐 A network problem interrupted the purchase. Please try again later.".to_string()
            }
            UserError::PaymentMethodMissing => {
                "💳 No payment method is configured on the storefront account.".to_string()
            }
            UserError::TwoFactor => {
                "📱 Two-factor verification failed. Please check your authenticator and try again."
                    .to_string()
            }
            UserError::PurchaseFailed { reason } => format!("❌ Purchase failed: {reason}"),
            UserError::Generic { message } => format!("❌ Scheduled order failed: {message}"),
        }
    }

    fn from_category(category: FaultCategory, fault: &JobFault) -> Self {
        match category {
            FaultCategory::SessionExpired => UserError::SessionExpired,
            FaultCategory::InvalidBackupCode => UserError::InvalidBackupCode,
            FaultCategory::StockUnavailable => UserError::StockUnavailable,
            FaultCategory::Network => UserError::Network,
            FaultCategory::PaymentMethodMissing => UserError::PaymentMethodMissing,
            FaultCategory::TwoFactor => UserError::TwoFactor,
            FaultCategory::PurchaseFailed => UserError::PurchaseFailed {
                reason: fault.message.clone(),
            },
        }
    }
}

/// Returns `true` when `message` reports a user-initiated cancellation.
#[must_use]
pub fn is_cancellation_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("cancelled by user") || lower.contains("canceled by user")
}

/// Classify `fault` into a [`UserError`].
///
/// Returns `None` for cancellation messages, which are not errors.
#[must_use]
pub fn classify(fault: &JobFault) -> Option<UserError> {
    if fault.is_cancellation() {
        return None;
    }

    if let Some(category) = fault
        .code
        .as_deref()
        .and_then(|code| code.parse::<FaultCategory>().ok())
    {
        return Some(UserError::from_category(category, fault));
    }

    Some(
        match_keywords(&fault.message).map_or_else(
            || UserError::Generic {
                message: fault.message.clone(),
            },
            |category| UserError::from_category(category, fault),
        ),
    )
}

fn match_keywords(message: &str) -> Option<FaultCategory> {
    let lower = message.to_lowercase();
    KEYWORD_PRIORITY.iter().find_map(|(category, keywords)| {
        let hit = match category {
            FaultCategory::InvalidBackupCode => {
                lower.contains("backup") && (lower.contains("invalid") || lower.contains("used"))
            }
            _ => keywords.iter().any(|k| lower.contains(k)),
        };
        hit.then_some(*category)
    })
}
