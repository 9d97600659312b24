use preorder_core::JobFault;
use thiserror::Error;

use crate::types::ServiceError;

/// Unit failures the engine records and moves past.
pub const PURCHASE_FAILED: &str = "PURCHASE_FAILED";

/// Errors returned by the storefront automation client.
#[derive(Debug, Error)]
pub enum StorefrontError {
    /// Network or TLS failure from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service rejected the request with a structured error.
    #[error("storefront error {status} [{}]: {}", .error.code, .error.message)]
    Service { status: u16, error: ServiceError },

    /// Non-2xx response without a structured error body.
    #[error("storefront returned HTTP {status}")]
    Status { status: u16 },

    /// The response body could not be deserialized into the expected type.
    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid storefront base URL '{0}'")]
    InvalidBaseUrl(String),
}

impl StorefrontError {
    /// A single unit failed; the rest of the order can go on.
    #[must_use]
    pub fn is_unit_failure(&self) -> bool {
        matches!(self, StorefrontError::Service { error, .. } if error.code == PURCHASE_FAILED)
    }

    /// Convert into the fault handed to the delivery path.
    ///
    /// `stage` is used when the service did not report one.
    #[must_use]
    pub fn into_fault(self, stage: &str) -> JobFault {
        match self {
            StorefrontError::Service { error, .. } => {
                let stage = error.stage.unwrap_or_else(|| stage.to_owned());
                JobFault::new(error.message)
                    .with_code(error.code)
                    .with_stage(stage)
            }
            StorefrontError::Http(e) => {
                let code = if e.is_timeout() { "TIMEOUT" } else { "NETWORK_ERROR" };
                JobFault::new(format!("network error talking to storefront: {e}"))
                    .with_code(code)
                    .with_stage(stage)
            }
            other => JobFault::new(other.to_string()).with_stage(stage),
        }
    }
}
