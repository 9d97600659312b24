//! Renders job progress into a single editable message per session.

use std::sync::Arc;

use preorder_core::{render_progress, SessionId};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::messenger::{Messenger, TextFormat};
use crate::runner::Progress;
use crate::session::SessionTracker;

#[derive(Clone)]
pub struct ProgressReporter {
    messenger: Arc<dyn Messenger>,
    sessions: Arc<SessionTracker>,
}

impl ProgressReporter {
    #[must_use]
    pub fn new(messenger: Arc<dyn Messenger>, sessions: Arc<SessionTracker>) -> Self {
        Self {
            messenger,
            sessions,
        }
    }

    /// Show `(completed, total)` in the session's progress message.
    ///
    /// Edits the tracked message in place. When the edit fails the message is
    /// considered gone: a new one is sent and replaces the tracked handle.
    /// Failures are logged, never returned. A `completed` value lower than one
    /// already seen is ignored.
    pub async fn render(&self, session: SessionId, completed: u32, total: u32) {
        if !self.sessions.advance_progress(session, completed) {
            tracing::debug!(
                session_id = session,
                completed,
                "delivery: out-of-order progress ignored"
            );
            return;
        }
        let text = render_progress(completed, total);
        if self.sessions.progress_unchanged(session, &text) {
            return;
        }

        if let Some(existing) = self.sessions.progress_message(session) {
            match self
                .messenger
                .edit(session, existing, &text, TextFormat::Plain)
                .await
            {
                Ok(()) => {
                    self.sessions.set_progress(session, existing, text);
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = session,
                        error = %e,
                        "delivery: progress edit failed, sending a new message"
                    );
                }
            }
        }

        match self.messenger.send(session, &text, TextFormat::Plain).await {
            Ok(message) => self.sessions.set_progress(session, message, text),
            Err(e) => {
                tracing::warn!(
                    session_id = session,
                    error = %e,
                    "delivery: progress message could not be sent"
                );
            }
        }
    }

    /// Render every published progress value until the job drops its sender.
    ///
    /// Values published while a render is in flight collapse into the latest.
    pub fn spawn(
        &self,
        session: SessionId,
        mut updates: watch::Receiver<Option<Progress>>,
    ) -> JoinHandle<()> {
        let reporter = self.clone();
        tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                let latest = *updates.borrow_and_update();
                if let Some(Progress { completed, total }) = latest {
                    reporter.render(session, completed, total).await;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CancelFlag, JobControl};
    use crate::test_support::{FakeMessenger, Sent};

    fn reporter(messenger: &Arc<FakeMessenger>) -> (ProgressReporter, Arc<SessionTracker>) {
        let sessions = Arc::new(SessionTracker::new());
        let m: Arc<dyn Messenger> = messenger.clone();
        (ProgressReporter::new(m, Arc::clone(&sessions)), sessions)
    }

    #[tokio::test]
    async fn first_render_sends_and_tracks_a_message() {
        let messenger = Arc::new(FakeMessenger::default());
        let (reporter, sessions) = reporter(&messenger);
        sessions.begin_job(1);

        reporter.render(1, 2, 10).await;

        let sent = messenger.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, render_progress(2, 10));
        assert_eq!(sessions.progress_message(1), Some(sent[0].id));
    }

    #[tokio::test]
    async fn repeated_identical_progress_is_rendered_once() {
        let messenger = Arc::new(FakeMessenger::default());
        let (reporter, sessions) = reporter(&messenger);
        sessions.begin_job(1);

        for _ in 0..5 {
            reporter.render(1, 5, 10).await;
        }

        assert_eq!(messenger.sent().len(), 1);
        assert!(messenger.edits().is_empty());
    }

    #[tokio::test]
    async fn later_progress_edits_in_place() {
        let messenger = Arc::new(FakeMessenger::default());
        let (reporter, sessions) = reporter(&messenger);
        sessions.begin_job(1);

        reporter.render(1, 1, 10).await;
        reporter.render(1, 6, 10).await;

        let sent = messenger.sent();
        assert_eq!(sent.len(), 1);
        let edits = messenger.edits();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].id, sent[0].id);
        assert_eq!(edits[0].text, render_progress(6, 10));
    }

    #[tokio::test]
    async fn late_lower_progress_is_ignored() {
        let messenger = Arc::new(FakeMessenger::default());
        let (reporter, sessions) = reporter(&messenger);
        sessions.begin_job(1);

        reporter.render(1, 1, 10).await;
        reporter.render(1, 6, 10).await;
        reporter.render(1, 5, 10).await;

        assert_eq!(messenger.sent().len(), 1);
        let edits = messenger.edits();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].text, render_progress(6, 10));
    }

    #[tokio::test]
    async fn failed_edit_replaces_the_tracked_message() {
        let messenger = Arc::new(FakeMessenger::default());
        let (reporter, sessions) = reporter(&messenger);
        sessions.begin_job(1);

        reporter.render(1, 1, 10).await;
        let first = sessions.progress_message(1).expect("tracked");
        messenger.fail_edits(true);
        reporter.render(1, 2, 10).await;

        let second = sessions.progress_message(1).expect("tracked");
        assert_ne!(first, second);
        assert_eq!(messenger.sent().len(), 2);

        // The replacement is edited from now on; the stale handle is not retried.
        messenger.fail_edits(false);
        reporter.render(1, 3, 10).await;
        let edits = messenger.edits();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].id, second);
    }

    #[tokio::test]
    async fn spawned_renderer_coalesces_and_stops_with_the_job() {
        let messenger = Arc::new(FakeMessenger::default());
        let (reporter, sessions) = reporter(&messenger);
        sessions.begin_job(1);

        let (control, rx) = JobControl::new(CancelFlag::new());
        let handle = reporter.spawn(1, rx);
        for i in 1..=10 {
            control.on_progress(i, 10);
        }
        drop(control);
        handle.await.expect("renderer task");

        let shown: Vec<Sent> = messenger.sent();
        assert_eq!(shown.len(), 1);
        let last = messenger
            .edits()
            .last()
            .map_or_else(|| shown[0].text.clone(), |e| e.text.clone());
        assert_eq!(last, render_progress(10, 10));
        assert_eq!(sessions.progress_message(1), Some(shown[0].id));
    }
}
