//! Request plumbing shared by every route: request ids, bearer auth that
//! identifies the caller, and a per-caller request budget.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, header::RETRY_AFTER, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

const API_KEYS_VAR: &str = "PREORDER_API_KEYS";

/// Newtype wrapping a request ID string, stored as a request extension.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Who is calling, stored as a request extension by [`require_bearer_auth`].
///
/// Keys are referred to by position in `PREORDER_API_KEYS` so the token itself
/// never ends up in logs or limiter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Caller {
    Key(usize),
    /// Auth is disabled.
    Anonymous,
}

impl std::fmt::Display for Caller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Key(index) => write!(f, "key-{index}"),
            Self::Anonymous => f.write_str("anonymous"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthState {
    /// Token to its position in the configured list.
    api_keys: Arc<HashMap<String, usize>>,
    pub enabled: bool,
}

impl AuthState {
    /// Reads `PREORDER_API_KEYS` (comma-separated bearer tokens).
    ///
    /// # Errors
    ///
    /// Fails outside development when no key is configured.
    pub fn from_env(is_development: bool) -> anyhow::Result<Self> {
        let raw = std::env::var(API_KEYS_VAR).unwrap_or_default();
        Self::from_raw(&raw, is_development)
    }

    /// Parse a comma-separated key list. Duplicates keep their first position.
    ///
    /// # Errors
    ///
    /// Fails outside development when `raw` holds no key.
    pub fn from_raw(raw: &str, is_development: bool) -> anyhow::Result<Self> {
        let mut keys = HashMap::new();
        for key in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let next = keys.len();
            keys.entry(key.to_owned()).or_insert(next);
        }

        if keys.is_empty() && !is_development {
            anyhow::bail!("{API_KEYS_VAR} is required outside development");
        }
        if keys.is_empty() {
            tracing::warn!("{API_KEYS_VAR} not set; bearer auth disabled in development");
        }

        Ok(Self {
            enabled: !keys.is_empty(),
            api_keys: Arc::new(keys),
        })
    }

    fn identify(&self, token: &str) -> Option<Caller> {
        self.api_keys.get(token).copied().map(Caller::Key)
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: Instant,
    count: usize,
}

/// Fixed-window limiter with one window per [`Caller`], so a noisy client
/// cannot starve the others (or their cancel requests).
#[derive(Debug, Clone)]
pub struct RateLimitState {
    max_requests: usize,
    window: Duration,
    windows: Arc<Mutex<HashMap<Caller, Window>>>,
}

impl RateLimitState {
    #[must_use]
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Count one request for `caller` at `now`.
    ///
    /// Returns how long until the caller's window resets when the budget is
    /// spent.
    async fn admit(&self, caller: Caller, now: Instant) -> Result<(), Duration> {
        let mut windows = self.windows.lock().await;
        let window = windows.entry(caller).or_insert(Window {
            started_at: now,
            count: 0,
        });

        let elapsed = now.saturating_duration_since(window.started_at);
        if elapsed >= self.window {
            *window = Window {
                started_at: now,
                count: 0,
            };
        }
        if window.count >= self.max_requests {
            return Err(self.window.saturating_sub(elapsed));
        }
        window.count += 1;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct MiddlewareErrorBody {
    error: MiddlewareError,
}

#[derive(Debug, Serialize)]
struct MiddlewareError {
    code: &'static str,
    message: &'static str,
}

fn reject(status: StatusCode, code: &'static str, message: &'static str) -> Response {
    (
        status,
        Json(MiddlewareErrorBody {
            error: MiddlewareError { code, message },
        }),
    )
        .into_response()
}

/// Reuse an incoming `x-request-id` or generate a `UUIDv4`, expose it as a
/// [`RequestId`] extension and echo it on the response.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| Uuid::new_v4().to_string(), String::from);

    req.extensions_mut().insert(RequestId(id.clone()));

    let mut res = next.run(req).await;

    if let Ok(val) = HeaderValue::from_str(&id) {
        res.headers_mut().insert("x-request-id", val);
    }

    res
}

/// Check the bearer token and attach the resulting [`Caller`].
pub async fn require_bearer_auth(
    State(auth): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Response {
    let caller = if auth.enabled {
        match extract_bearer_token(req.headers().get(AUTHORIZATION)).and_then(|t| auth.identify(t))
        {
            Some(caller) => caller,
            None => {
                return reject(
                    StatusCode::UNAUTHORIZED,
                    "unauthorized",
                    "missing or invalid bearer token",
                )
            }
        }
    } else {
        Caller::Anonymous
    };

    req.extensions_mut().insert(caller);
    next.run(req).await
}

/// Enforce the per-caller budget. Runs after [`require_bearer_auth`]; a
/// request without a [`Caller`] is budgeted as anonymous.
pub async fn enforce_rate_limit(
    State(rate_limit): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    let caller = req
        .extensions()
        .get::<Caller>()
        .copied()
        .unwrap_or(Caller::Anonymous);

    if let Err(retry_after) = rate_limit.admit(caller, Instant::now()).await {
        tracing::warn!(%caller, "rate limit exceeded");
        let mut res = reject(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            "rate limit exceeded",
        );
        let secs = retry_after.as_secs().max(1);
        if let Ok(val) = HeaderValue::from_str(&secs.to_string()) {
            res.headers_mut().insert(RETRY_AFTER, val);
        }
        return res;
    }

    next.run(req).await
}

fn extract_bearer_token(value: Option<&HeaderValue>) -> Option<&str> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_bearer_token_accepts_valid_header() {
        let header = HeaderValue::from_static("Bearer test-token");
        assert_eq!(extract_bearer_token(Some(&header)), Some("test-token"));
    }

    #[test]
    fn extract_bearer_token_rejects_non_bearer_header() {
        let header = HeaderValue::from_static("Basic abc123");
        assert_eq!(extract_bearer_token(Some(&header)), None);
        assert_eq!(extract_bearer_token(None), None);
    }

    #[test]
    fn auth_state_disables_when_no_keys_in_dev() {
        let state = AuthState::from_raw("", true).expect("dev should allow missing keys");
        assert!(!state.enabled);
    }

    #[test]
    fn auth_state_requires_keys_outside_dev() {
        assert!(AuthState::from_raw(" , ", false).is_err());
    }

    #[test]
    fn keys_identify_callers_by_position() {
        let state = AuthState::from_raw(" alpha , beta, alpha,", false).expect("keys present");
        assert!(state.enabled);
        assert_eq!(state.identify("alpha"), Some(Caller::Key(0)));
        assert_eq!(state.identify("beta"), Some(Caller::Key(1)));
        assert_eq!(state.identify("gamma"), None);
        assert_eq!(Caller::Key(1).to_string(), "key-1");
    }

    #[tokio::test]
    async fn each_caller_has_its_own_budget() {
        let limiter = RateLimitState::new(2, Duration::from_secs(60));
        let now = Instant::now();

        assert!(limiter.admit(Caller::Key(0), now).await.is_ok());
        assert!(limiter.admit(Caller::Key(0), now).await.is_ok());
        assert!(limiter.admit(Caller::Key(0), now).await.is_err());

        assert!(limiter.admit(Caller::Key(1), now).await.is_ok());
        assert!(limiter.admit(Caller::Anonymous, now).await.is_ok());
    }

    #[tokio::test]
    async fn spent_budget_resets_with_the_window() {
        let limiter = RateLimitState::new(1, Duration::from_secs(60));
        let start = Instant::now();

        assert!(limiter.admit(Caller::Key(0), start).await.is_ok());
        let retry = limiter
            .admit(Caller::Key(0), start + Duration::from_secs(20))
            .await
            .unwrap_err();
        assert_eq!(retry, Duration::from_secs(40));

        assert!(limiter
            .admit(Caller::Key(0), start + Duration::from_secs(60))
            .await
            .is_ok());
    }
}
