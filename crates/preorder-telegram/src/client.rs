//! HTTP client for the Telegram Bot API.
//!
//! Every method is a `POST` to `{base}/bot{token}/{method}`. Telegram answers
//! with a JSON envelope (`ok`, `result`, `description`, `parameters`) even on
//! 4xx statuses, so the envelope is parsed before the HTTP status is judged.

use std::path::Path;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;

use preorder_engine::{retry_with_backoff, Backoff};

use crate::error::TelegramError;
use crate::retry::retry_decision;
use crate::types::{Envelope, SentMessage};

const DEFAULT_BASE_URL: &str = "https://api.telegram.org";

/// Retry and timeout settings for [`TelegramClient`].
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

pub struct TelegramClient {
    client: Client,
    /// `{base}/bot{token}/`; method names are joined onto it.
    endpoint: Url,
    options: ClientOptions,
}

impl TelegramClient {
    /// Creates a client pointed at the production Bot API.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(token: &str, options: ClientOptions) -> Result<Self, TelegramError> {
        Self::with_base_url(token, options, DEFAULT_BASE_URL)
    }

    /// Creates a client with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed, or [`TelegramError::InvalidBaseUrl`] if
    /// `base_url` is not a valid URL.
    pub fn with_base_url(
        token: &str,
        options: ClientOptions,
        base_url: &str,
    ) -> Result<Self, TelegramError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("preorder/0.1 (scheduled-orders)")
            .build()?;

        let endpoint = format!("{}/bot{token}/", base_url.trim_end_matches('/'));
        let endpoint =
            Url::parse(&endpoint).map_err(|_| TelegramError::InvalidBaseUrl(base_url.to_owned()))?;

        Ok(Self {
            client,
            endpoint,
            options,
        })
    }

    /// Sends a text message and returns its `message_id`.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError`] if the API rejects the message or every
    /// attempt fails.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        parse_mode: Option<&str>,
    ) -> Result<i64, TelegramError> {
        let mut body = serde_json::json!({ "chat_id": chat_id, "text": text });
        if let Some(mode) = parse_mode {
            body["parse_mode"] = mode.into();
        }
        let sent: SentMessage = self.call_json("sendMessage", &body).await?;
        Ok(sent.message_id)
    }

    /// Replaces the text of a message previously sent by the bot.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError`] if the API rejects the edit or every attempt
    /// fails.
    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        parse_mode: Option<&str>,
    ) -> Result<(), TelegramError> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
        });
        if let Some(mode) = parse_mode {
            body["parse_mode"] = mode.into();
        }
        // `result` is the edited Message, or `true` for inline messages.
        let _: serde_json::Value = self.call_json("editMessageText", &body).await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`TelegramError`] if the API rejects the deletion or every
    /// attempt fails.
    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), TelegramError> {
        let body = serde_json::json!({ "chat_id": chat_id, "message_id": message_id });
        let _: bool = self.call_json("deleteMessage", &body).await?;
        Ok(())
    }

    /// Uploads the file at `path` as a document and returns its `message_id`.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError::Attachment`] if the file cannot be read, or
    /// another [`TelegramError`] if the upload fails.
    pub async fn send_document(
        &self,
        chat_id: i64,
        path: &Path,
        caption: &str,
    ) -> Result<i64, TelegramError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| TelegramError::Attachment {
                path: path.to_path_buf(),
                source,
            })?;
        let file_name = path
            .file_name()
            .map_or_else(|| "document.txt".to_owned(), |n| n.to_string_lossy().into_owned());
        let url = self.method_url("sendDocument")?;

        let sent: SentMessage =
            retry_with_backoff(self.options.backoff(), "telegram", retry_decision, || {
                // Multipart bodies are consumed by `send`; rebuild one per attempt.
                let form = Form::new()
                    .text("chat_id", chat_id.to_string())
                    .text("caption", caption.to_owned())
                    .part(
                        "document",
                        Part::bytes(bytes.clone()).file_name(file_name.clone()),
                    );
                let request = self.client.post(url.clone()).multipart(form);
                async move { Self::read_envelope(request.send().await?, "sendDocument").await }
            })
            .await?;
        Ok(sent.message_id)
    }

    fn method_url(&self, method: &str) -> Result<Url, TelegramError> {
        self.endpoint
            .join(method)
            .map_err(|_| TelegramError::InvalidBaseUrl(self.endpoint.to_string()))
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        method: &'static str,
        body: &serde_json::Value,
    ) -> Result<T, TelegramError> {
        let url = self.method_url(method)?;
        retry_with_backoff(self.options.backoff(), "telegram", retry_decision, || {
            let request = self.client.post(url.clone()).json(body);
            async move { Self::read_envelope(request.send().await?, method).await }
        })
        .await
    }

    /// Turns a raw response into the typed `result`, or the API's error.
    async fn read_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
        method: &str,
    ) -> Result<T, TelegramError> {
        let status = response.status();
        let text = response.text().await?;

        let envelope: Envelope<T> = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(source) if status.is_success() => {
                return Err(TelegramError::Deserialize {
                    context: method.to_owned(),
                    source,
                });
            }
            Err(_) => {
                return Err(TelegramError::Api {
                    code: status.as_u16(),
                    description: text.chars().take(200).collect(),
                });
            }
        };

        if envelope.ok {
            return envelope.result.ok_or_else(|| TelegramError::Deserialize {
                context: method.to_owned(),
                source: <serde_json::Error as serde::de::Error>::missing_field("result"),
            });
        }

        let code = envelope.error_code.unwrap_or_else(|| status.as_u16());
        if let Some(retry_after_secs) = envelope.parameters.and_then(|p| p.retry_after) {
            return Err(TelegramError::RateLimited { retry_after_secs });
        }
        if code == 429 {
            return Err(TelegramError::RateLimited {
                retry_after_secs: 1,
            });
        }
        Err(TelegramError::Api {
            code,
            description: envelope
                .description
                .unwrap_or_else(|| "unknown error".to_owned()),
        })
    }
}
