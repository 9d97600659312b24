//! HTTP client for the storefront automation service.
//!
//! The service exposes two calls: open an order for an item and quantity,
//! then buy one unit at a time against it. Failures come back as a JSON
//! `{ "error": { code, message, stage } }` body.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;

use preorder_core::{ItemSpec, OrderId};
use preorder_engine::{retry_with_backoff, Backoff};

use crate::error::StorefrontError;
use crate::retry::{transient, unsent};
use crate::types::{CreateOrderRequest, CreatedOrder, ErrorEnvelope, Purchase};

/// Retry and timeout settings for [`StorefrontClient`].
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            backoff_base_ms: 500,
        }
    }
}

impl ClientOptions {
    #[must_use]
    pub fn from_app_config(config: &preorder_core::AppConfig) -> Self {
        Self {
            timeout_secs: config.http_timeout_secs,
            max_retries: config.http_max_retries,
            backoff_base_ms: config.http_backoff_base_ms,
        }
    }

    fn backoff(self) -> Backoff {
        Backoff::new(self.max_retries, self.backoff_base_ms)
    }
}

pub struct StorefrontClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    options: ClientOptions,
}

impl std::fmt::Debug for StorefrontClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorefrontClient")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "[redacted]"))
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl StorefrontClient {
    /// # Errors
    ///
    /// Returns [`StorefrontError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed, or [`StorefrontError::InvalidBaseUrl`] if
    /// `base_url` is not a valid URL.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        options: ClientOptions,
    ) -> Result<Self, StorefrontError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("preorder/0.1 (scheduled-orders)")
            .build()?;

        // Trailing slash so `join` appends instead of replacing the last segment.
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized)
            .map_err(|_| StorefrontError::InvalidBaseUrl(base_url.to_owned()))?;

        Ok(Self {
            client,
            base_url,
            api_key,
            options,
        })
    }

    /// Opens a storefront order and returns its id.
    ///
    /// Retried on transient failures; the scheduled order id is sent as
    /// `reference` so the service can deduplicate.
    ///
    /// # Errors
    ///
    /// Returns [`StorefrontError`] if the service rejects the order or every
    /// attempt fails.
    pub async fn create_order(
        &self,
        reference: OrderId,
        item: &ItemSpec,
        quantity: u32,
    ) -> Result<String, StorefrontError> {
        let url = self.url("v1/orders")?;
        let body = CreateOrderRequest::new(reference, item, quantity);
        let created: CreatedOrder = retry_with_backoff(
            self.options.backoff(),
            "storefront",
            transient,
            || {
                let request = self.authorized(self.client.post(url.clone()).json(&body));
                async move { Self::read_json(request.send().await?, "create_order").await }
            },
        )
        .await?;
        Ok(created.order_id)
    }

    /// Buys unit `unit` (1-based) of `order_id`.
    ///
    /// Only retried when the request never reached the service.
    ///
    /// # Errors
    ///
    /// Returns [`StorefrontError::Service`] with code `PURCHASE_FAILED` when
    /// this unit could not be bought, or another [`StorefrontError`] when the
    /// order as a whole cannot continue.
    pub async fn purchase(&self, order_id: &str, unit: u32) -> Result<Purchase, StorefrontError> {
        let url = self.url(&format!("v1/orders/{order_id}/purchases"))?;
        let body = serde_json::json!({ "unit": unit });
        retry_with_backoff(
            self.options.backoff(),
            "storefront",
            unsent,
            || {
                let request = self.authorized(self.client.post(url.clone()).json(&body));
                async move { Self::read_json(request.send().await?, "purchase").await }
            },
        )
        .await
    }

    fn url(&self, path: &str) -> Result<Url, StorefrontError> {
        self.base_url
            .join(path)
            .map_err(|_| StorefrontError::InvalidBaseUrl(self.base_url.to_string()))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn read_json<T: DeserializeOwned>(
        response: reqwest::Response,
        context: &str,
    ) -> Result<T, StorefrontError> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<ErrorEnvelope>(&text) {
                Ok(envelope) => StorefrontError::Service {
                    status: status.as_u16(),
                    error: envelope.error,
                },
                Err(_) => StorefrontError::Status {
                    status: status.as_u16(),
                },
            });
        }

        serde_json::from_str(&text).map_err(|source| StorefrontError::Deserialize {
            context: context.to_owned(),
            source,
        })
    }
}
