//! Attachment delivery of formatted artifacts.

use preorder_core::{plain_text_chunks, Artifact, SessionId, MAX_MESSAGE_LEN};
use thiserror::Error;

use crate::messenger::{MessagingError, Messenger, TextFormat};

/// Renders an artifact as plain messages when attachments cannot be sent.
pub type PlainTextFallback = fn(&Artifact) -> Vec<String>;

/// Fallback splitting content below the message length limit.
#[must_use]
pub fn chunked_plain_text(artifact: &Artifact) -> Vec<String> {
    plain_text_chunks(artifact, MAX_MESSAGE_LEN)
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to stage artifact {file_name}: {source}")]
    Staging {
        file_name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to deliver artifact {file_name}: {source}")]
    Send {
        file_name: String,
        #[source]
        source: MessagingError,
    },
}

/// Send every artifact in `artifacts` to `session` as a file attachment.
///
/// Each file is written to a private temporary directory and removed after
/// the send attempt whether or not it succeeded. When an attachment cannot be
/// sent and `fallback` is given, its content goes out as plain messages
/// instead.
///
/// # Errors
///
/// Returns [`DeliveryError`] on the first artifact that could neither be
/// attached nor delivered through the fallback.
pub async fn deliver_artifacts(
    messenger: &dyn Messenger,
    session: SessionId,
    artifacts: &[Artifact],
    fallback: Option<PlainTextFallback>,
) -> Result<(), DeliveryError> {
    if artifacts.is_empty() {
        return Ok(());
    }

    let staging = tempfile::tempdir().map_err(|source| DeliveryError::Staging {
        file_name: artifacts[0].file_name.clone(),
        source,
    })?;

    for artifact in artifacts {
        let path = staging.path().join(&artifact.file_name);
        tokio::fs::write(&path, artifact.content.as_bytes())
            .await
            .map_err(|source| DeliveryError::Staging {
                file_name: artifact.file_name.clone(),
                source,
            })?;

        let sent = messenger
            .send_attachment(session, &path, &artifact.caption)
            .await;

        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!(
                session_id = session,
                file = %artifact.file_name,
                error = %e,
                "delivery: failed to remove staged artifact"
            );
        }

        let Err(send_error) = sent else {
            continue;
        };

        let Some(fallback) = fallback else {
            return Err(DeliveryError::Send {
                file_name: artifact.file_name.clone(),
                source: send_error,
            });
        };

        tracing::warn!(
            session_id = session,
            file = %artifact.file_name,
            error = %send_error,
            "delivery: attachment failed, falling back to plain text"
        );
        for chunk in fallback(artifact) {
            messenger
                .send(session, &chunk, TextFormat::Plain)
                .await
                .map_err(|source| DeliveryError::Send {
                    file_name: artifact.file_name.clone(),
                    source,
                })?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use preorder_core::{format_artifacts, PinRecord};

    use super::*;
    use crate::test_support::FakeMessenger;

    fn artifacts() -> Vec<Artifact> {
        let pins = vec![
            PinRecord::redeemed("AAAA-1111", Some("SN1".to_string())),
            PinRecord::failed(Some("payment".to_string()), "declined"),
            PinRecord::redeemed("BBBB-2222", Some("SN2".to_string())),
        ];
        format_artifacts(42, &pins, false)
    }

    #[tokio::test]
    async fn delivers_each_artifact_and_removes_staged_files() {
        let messenger = Arc::new(FakeMessenger::default());
        deliver_artifacts(messenger.as_ref(), 1, &artifacts(), None)
            .await
            .expect("delivery");

        let attachments = messenger.attachments();
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].file_name, "order_42_codes_with_serials.txt");
        assert_eq!(
            attachments[0].content,
            "Code: AAAA-1111\nSerial: SN1\n\nCode: BBBB-2222\nSerial: SN2\n"
        );
        assert_eq!(attachments[1].content, "AAAA-1111\nBBBB-2222\n");
        assert!(attachments.iter().all(|a| !a.path.exists()));
    }

    #[tokio::test]
    async fn staged_file_is_removed_when_send_fails() {
        let messenger = Arc::new(FakeMessenger::default());
        messenger.fail_attachments(true);

        let err = deliver_artifacts(messenger.as_ref(), 1, &artifacts(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, DeliveryError::Send { ref file_name, .. } if file_name == "order_42_codes_with_serials.txt"));
        let attempts = messenger.attachments();
        assert_eq!(attempts.len(), 1);
        assert!(!attempts[0].path.exists());
    }

    #[tokio::test]
    async fn failed_attachment_uses_plain_text_fallback() {
        let messenger = Arc::new(FakeMessenger::default());
        messenger.fail_attachments(true);

        deliver_artifacts(
            messenger.as_ref(),
            1,
            &artifacts(),
            Some(chunked_plain_text),
        )
        .await
        .expect("fallback delivery");

        let sent = messenger.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].text.starts_with("🧾 Order #42 · codes with serial numbers"));
        assert!(sent[0].text.contains("Code: BBBB-2222"));
        assert!(sent[1].text.ends_with("AAAA-1111\nBBBB-2222"));
    }

    #[tokio::test]
    async fn nothing_to_deliver_is_a_no_op() {
        let messenger = Arc::new(FakeMessenger::default());
        deliver_artifacts(messenger.as_ref(), 1, &[], None)
            .await
            .expect("empty delivery");
        assert!(messenger.attachments().is_empty());
        assert!(messenger.sent().is_empty());
    }
}
