//! Retry policies for the storefront client.
//!
//! Order creation is retried on any transient failure. A purchase is only
//! retried when the request never reached the service, since repeating it
//! could buy a second unit.

use preorder_engine::RetryDecision;

use crate::error::StorefrontError;

fn is_transient(err: &StorefrontError) -> bool {
    match err {
        StorefrontError::Http(e) => {
            e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
        }
        StorefrontError::Status { status } | StorefrontError::Service { status, .. } => {
            *status >= 500
        }
        StorefrontError::Deserialize { .. } | StorefrontError::InvalidBaseUrl(_) => false,
    }
}

/// Network failures and 5xx responses.
pub(crate) fn transient(err: &StorefrontError) -> RetryDecision {
    if is_transient(err) {
        RetryDecision::Backoff
    } else {
        RetryDecision::GiveUp
    }
}

/// Only failures where the request was never delivered.
pub(crate) fn unsent(err: &StorefrontError) -> RetryDecision {
    if matches!(err, StorefrontError::Http(e) if e.is_connect()) {
        RetryDecision::Backoff
    } else {
        RetryDecision::GiveUp
    }
}
