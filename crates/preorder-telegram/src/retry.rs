//! Which Telegram failures are worth another attempt.
//!
//! Flood-control answers (HTTP 429) carry their own `retry_after`, which is
//! honoured instead of the computed back-off.

use std::time::Duration;

use preorder_engine::RetryDecision;

use crate::error::TelegramError;

/// Network failures, 5xx responses and flood control are retried. API
/// rejections, malformed responses and local I/O errors are not.
pub(crate) fn retry_decision(err: &TelegramError) -> RetryDecision {
    match err {
        TelegramError::Http(e)
            if e.is_timeout()
                || e.is_connect()
                || e.status().is_some_and(|s| s.is_server_error()) =>
        {
            RetryDecision::Backoff
        }
        TelegramError::Api { code, .. } if *code >= 500 => RetryDecision::Backoff,
        TelegramError::RateLimited { retry_after_secs } => {
            RetryDecision::After(Duration::from_secs(*retry_after_secs))
        }
        TelegramError::Http(_)
        | TelegramError::Api { .. }
        | TelegramError::Deserialize { .. }
        | TelegramError::Attachment { .. }
        | TelegramError::InvalidBaseUrl(_) => RetryDecision::GiveUp,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use preorder_engine::{retry_with_backoff, Backoff};

    use super::*;

    #[test]
    fn client_errors_are_not_retried() {
        assert_eq!(
            retry_decision(&TelegramError::Api {
                code: 400,
                description: "Bad Request: chat not found".to_owned(),
            }),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn server_errors_back_off() {
        assert_eq!(
            retry_decision(&TelegramError::Api {
                code: 502,
                description: "Bad Gateway".to_owned(),
            }),
            RetryDecision::Backoff
        );
    }

    #[test]
    fn flood_control_waits_as_told() {
        assert_eq!(
            retry_decision(&TelegramError::RateLimited {
                retry_after_secs: 3
            }),
            RetryDecision::After(Duration::from_secs(3))
        );
    }

    #[tokio::test]
    async fn does_not_retry_api_rejections() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(Backoff::new(3, 0), "telegram", retry_decision, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(TelegramError::Api {
                    code: 403,
                    description: "Forbidden: bot was blocked by the user".to_owned(),
                })
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(TelegramError::Api { code: 403, .. })));
    }

    #[tokio::test]
    async fn retries_flood_control_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(Backoff::new(3, 0), "telegram", retry_decision, || {
            let c = Arc::clone(&c);
            async move {
                let attempt = c.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt < 3 {
                    Err::<u32, _>(TelegramError::RateLimited {
                        retry_after_secs: 0,
                    })
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
