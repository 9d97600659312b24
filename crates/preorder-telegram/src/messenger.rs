//! [`Messenger`] over the Bot API: a session id is a Telegram chat id.

use std::path::Path;

use async_trait::async_trait;
use preorder_core::SessionId;
use preorder_engine::{MessageRef, MessagingError, Messenger, TextFormat};

use crate::client::TelegramClient;
use crate::error::TelegramError;

fn parse_mode(format: TextFormat) -> Option<&'static str> {
    match format {
        TextFormat::Plain => None,
        TextFormat::Html => Some("HTML"),
    }
}

fn to_messaging_error(err: TelegramError, message: Option<MessageRef>) -> MessagingError {
    match message {
        Some(message) if err.is_unaddressable() => MessagingError::Unaddressable(message),
        _ => MessagingError::Transport(err.to_string()),
    }
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send(
        &self,
        session: SessionId,
        text: &str,
        format: TextFormat,
    ) -> Result<MessageRef, MessagingError> {
        self.send_message(session, text, parse_mode(format))
            .await
            .map(MessageRef)
            .map_err(|e| to_messaging_error(e, None))
    }

    async fn edit(
        &self,
        session: SessionId,
        message: MessageRef,
        text: &str,
        format: TextFormat,
    ) -> Result<(), MessagingError> {
        match self
            .edit_message_text(session, message.0, text, parse_mode(format))
            .await
        {
            Err(e) if e.is_not_modified() => Ok(()),
            other => other.map_err(|e| to_messaging_error(e, Some(message))),
        }
    }

    async fn delete(&self, session: SessionId, message: MessageRef) -> Result<(), MessagingError> {
        self.delete_message(session, message.0)
            .await
            .map_err(|e| to_messaging_error(e, Some(message)))
    }

    async fn send_attachment(
        &self,
        session: SessionId,
        path: &Path,
        caption: &str,
    ) -> Result<(), MessagingError> {
        self.send_document(session, path, caption)
            .await
            .map(|_| ())
            .map_err(|e| to_messaging_error(e, None))
    }
}
