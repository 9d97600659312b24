//! Per-session tracking: ephemeral message handles and the running job's
//! cancellation flag.
//!
//! State is created lazily when a job starts and cleared when the job reaches
//! a terminal state, so handles from one job never leak into the next job for
//! the same session.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use preorder_core::SessionId;

use crate::messenger::MessageRef;
use crate::runner::CancelFlag;

#[derive(Debug, Default, Clone)]
struct SessionState {
    progress_message: Option<MessageRef>,
    progress_text: Option<String>,
    /// Highest `completed` value seen for the running job.
    progress_high: Option<u32>,
    status_message: Option<MessageRef>,
    cancel: Option<CancelFlag>,
}

/// Messages to clean up when a job ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EphemeralMessages {
    pub progress: Option<MessageRef>,
    pub status: Option<MessageRef>,
}

impl EphemeralMessages {
    pub fn iter(&self) -> impl Iterator<Item = MessageRef> {
        self.progress.into_iter().chain(self.status)
    }
}

#[derive(Debug, Default)]
pub struct SessionTracker {
    sessions: Mutex<HashMap<SessionId, SessionState>>,
}

impl SessionTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a new job in `session` and return its cancellation flag.
    ///
    /// Any state a previous job left behind is replaced.
    pub fn begin_job(&self, session: SessionId) -> CancelFlag {
        let flag = CancelFlag::new();
        self.lock().insert(
            session,
            SessionState {
                cancel: Some(flag.clone()),
                ..SessionState::default()
            },
        );
        flag
    }

    /// Raise the cancellation flag of the job running in `session`.
    ///
    /// Returns `false` when no job is running there.
    pub fn request_cancel(&self, session: SessionId) -> bool {
        match self.lock().get(&session).and_then(|s| s.cancel.as_ref()) {
            Some(flag) => {
                flag.cancel();
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_cancel_requested(&self, session: SessionId) -> bool {
        self.lock()
            .get(&session)
            .and_then(|s| s.cancel.as_ref())
            .is_some_and(CancelFlag::is_cancelled)
    }

    pub fn set_status_message(&self, session: SessionId, message: MessageRef) {
        self.lock().entry(session).or_default().status_message = Some(message);
    }

    #[must_use]
    pub fn progress_message(&self, session: SessionId) -> Option<MessageRef> {
        self.lock().get(&session).and_then(|s| s.progress_message)
    }

    /// Whether `text` is what the tracked progress message already shows.
    #[must_use]
    pub fn progress_unchanged(&self, session: SessionId, text: &str) -> bool {
        self.lock()
            .get(&session)
            .is_some_and(|s| s.progress_message.is_some() && s.progress_text.as_deref() == Some(text))
    }

    /// Raise the session's progress high-water mark to `completed`.
    ///
    /// Returns `false` for a value below the mark: the update arrived late and
    /// must not move the bar backwards.
    pub fn advance_progress(&self, session: SessionId, completed: u32) -> bool {
        let mut sessions = self.lock();
        let state = sessions.entry(session).or_default();
        if state.progress_high.is_some_and(|high| completed < high) {
            return false;
        }
        state.progress_high = Some(completed);
        true
    }

    /// Record `message` as the session's only progress message showing `text`.
    pub fn set_progress(&self, session: SessionId, message: MessageRef, text: String) {
        let mut sessions = self.lock();
        let state = sessions.entry(session).or_default();
        state.progress_message = Some(message);
        state.progress_text = Some(text);
    }

    #[must_use]
    pub fn ephemeral_messages(&self, session: SessionId) -> EphemeralMessages {
        self.lock()
            .get(&session)
            .map(|s| EphemeralMessages {
                progress: s.progress_message,
                status: s.status_message,
            })
            .unwrap_or_default()
    }

    /// Drop everything tracked for `session`.
    ///
    /// Only clears when the tracked job is the one owning `flag`; a newer job
    /// in the same session keeps its state.
    pub fn clear(&self, session: SessionId, flag: &CancelFlag) {
        let mut sessions = self.lock();
        let owned = sessions
            .get(&session)
            .is_some_and(|s| s.cancel.as_ref().map_or(true, |c| c.same_job(flag)));
        if owned {
            sessions.remove(&session);
        }
    }

    #[must_use]
    pub fn is_tracked(&self, session: SessionId) -> bool {
        self.lock().contains_key(&session)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, SessionState>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
