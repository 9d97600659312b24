//! Retry with exponential back-off and jitter, shared by the HTTP clients
//! behind [`Messenger`](crate::Messenger) and [`PurchaseEngine`](crate::PurchaseEngine).
//!
//! The caller decides per error whether to give up, back off, or wait for a
//! delay the remote side asked for.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Upper bound for any single delay, including server-requested ones.
pub const MAX_DELAY: Duration = Duration::from_secs(60);

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    GiveUp,
    Backoff,
    /// The remote side named its own delay.
    After(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Additional attempts after the first.
    pub max_retries: u32,
    pub base_ms: u64,
}

impl Backoff {
    #[must_use]
    pub fn new(max_retries: u32, base_ms: u64) -> Self {
        Self {
            max_retries,
            base_ms,
        }
    }

    /// Delay before retry number `attempt` (1-based): `base_ms` doubled per
    /// attempt, capped at [`MAX_DELAY`], with ±25 % jitter.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn delay(&self, attempt: u32) -> Duration {
        let max_ms = u64::try_from(MAX_DELAY.as_millis()).unwrap_or(u64::MAX);
        let computed = self
            .base_ms
            .saturating_mul(1u64 << attempt.saturating_sub(1).min(10));
        let capped = computed.min(max_ms);
        Duration::from_millis((capped as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64)
    }
}

/// Run `operation` until it succeeds, `decide` gives up, or the retry budget
/// is spent. The last error is returned.
///
/// `client` only labels the log line.
pub async fn retry_with_backoff<T, E, F, Fut, D>(
    backoff: Backoff,
    client: &'static str,
    decide: D,
    mut operation: F,
) -> Result<T, E>
where
    E: Display,
    D: Fn(&E) -> RetryDecision,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        let delay = match decide(&err) {
            _ if attempt >= backoff.max_retries => return Err(err),
            RetryDecision::GiveUp => return Err(err),
            RetryDecision::Backoff => backoff.delay(attempt + 1),
            RetryDecision::After(requested) => requested.min(MAX_DELAY),
        };
        attempt += 1;
        tracing::warn!(
            client,
            attempt,
            max_retries = backoff.max_retries,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "transient error, retrying after back-off"
        );
        tokio::time::sleep(delay).await;
    }
}
