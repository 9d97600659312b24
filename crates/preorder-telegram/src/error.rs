use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by the Telegram Bot API client.
#[derive(Debug, Error)]
pub enum TelegramError {
    /// Network or TLS failure from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered `"ok": false`.
    #[error("Telegram API error {code}: {description}")]
    Api { code: u16, description: String },

    /// Flood control: the API asked us to wait before the next call.
    #[error("rate limited by Telegram; retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The response body could not be deserialized into the expected type.
    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read attachment {path}: {source}")]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid Telegram base URL '{0}'")]
    InvalidBaseUrl(String),
}

impl TelegramError {
    /// The target message is gone or too old to be edited or deleted.
    #[must_use]
    pub fn is_unaddressable(&self) -> bool {
        let TelegramError::Api { description, .. } = self else {
            return false;
        };
        let description = description.to_lowercase();
        [
            "message to edit not found",
            "message to delete not found",
            "message can't be edited",
            "message can't be deleted",
        ]
        .iter()
        .any(|needle| description.contains(needle))
    }

    /// An edit that would leave the message unchanged.
    #[must_use]
    pub fn is_not_modified(&self) -> bool {
        matches!(
            self,
            TelegramError::Api { description, .. }
                if description.to_lowercase().contains("message is not modified")
        )
    }
}
