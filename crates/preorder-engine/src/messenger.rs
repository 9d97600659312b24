//! Messaging contract: the channel job notices and artifacts are sent through.

use std::path::Path;

use async_trait::async_trait;
use preorder_core::SessionId;
use thiserror::Error;

/// Handle to a message already shown in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextFormat {
    #[default]
    Plain,
    Html,
}

#[derive(Debug, Error)]
pub enum MessagingError {
    /// The message can no longer be edited or deleted (too old, already gone).
    #[error("message {0:?} is no longer addressable")]
    Unaddressable(MessageRef),
    #[error("messaging transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(
        &self,
        session: SessionId,
        text: &str,
        format: TextFormat,
    ) -> Result<MessageRef, MessagingError>;

    async fn edit(
        &self,
        session: SessionId,
        message: MessageRef,
        text: &str,
        format: TextFormat,
    ) -> Result<(), MessagingError>;

    /// Callers treat failures as non-fatal.
    async fn delete(&self, session: SessionId, message: MessageRef) -> Result<(), MessagingError>;

    /// Upload the file at `path` as a document with `caption`.
    async fn send_attachment(
        &self,
        session: SessionId,
        path: &Path,
        caption: &str,
    ) -> Result<(), MessagingError>;
}
