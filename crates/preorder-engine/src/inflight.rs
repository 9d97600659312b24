//! Dispatch guard: at most one running job per order and per session.
//!
//! A [`Claim`] is taken before a job is spawned and released when it is
//! dropped, so the entry disappears when the job task ends however it ends,
//! including by panic.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use preorder_core::{OrderId, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchConflict {
    /// A previous tick's job for this order is still running.
    OrderRunning,
    /// Another order is running in the same session.
    SessionBusy,
}

#[derive(Debug, Default)]
struct Entries {
    orders: HashSet<OrderId>,
    sessions: HashSet<SessionId>,
}

#[derive(Debug, Clone, Default)]
pub struct InFlight {
    entries: Arc<Mutex<Entries>>,
}

impl InFlight {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `order` as running in `session`.
    ///
    /// # Errors
    ///
    /// Returns the [`DispatchConflict`] that prevents dispatch; nothing is
    /// registered in that case.
    pub fn claim(&self, order: OrderId, session: SessionId) -> Result<Claim, DispatchConflict> {
        let mut entries = self.lock();
        if entries.orders.contains(&order) {
            return Err(DispatchConflict::OrderRunning);
        }
        if entries.sessions.contains(&session) {
            return Err(DispatchConflict::SessionBusy);
        }
        entries.orders.insert(order);
        entries.sessions.insert(session);
        drop(entries);

        Ok(Claim {
            entries: Arc::clone(&self.entries),
            order,
            session,
        })
    }

    #[must_use]
    pub fn contains(&self, order: OrderId) -> bool {
        self.lock().orders.contains(&order)
    }

    #[must_use]
    pub fn session_busy(&self, session: SessionId) -> bool {
        self.lock().sessions.contains(&session)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().orders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        // The set stays consistent even if a holder panicked mid-section.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof of dispatch; releases its order and session on drop.
#[derive(Debug)]
pub struct Claim {
    entries: Arc<Mutex<Entries>>,
    order: OrderId,
    session: SessionId,
}

impl Claim {
    #[must_use]
    pub fn order(&self) -> OrderId {
        self.order
    }

    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        entries.orders.remove(&self.order);
        entries.sessions.remove(&self.session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_for_same_order_is_rejected() {
        let in_flight = InFlight::new();
        let _claim = in_flight.claim(1, 100).expect("first claim");
        assert_eq!(
            in_flight.claim(1, 100).unwrap_err(),
            DispatchConflict::OrderRunning
        );
        assert_eq!(in_flight.len(), 1);
    }

    #[test]
    fn second_order_in_same_session_is_rejected() {
        let in_flight = InFlight::new();
        let _claim = in_flight.claim(1, 100).expect("first claim");
        assert_eq!(
            in_flight.claim(2, 100).unwrap_err(),
            DispatchConflict::SessionBusy
        );
        assert!(!in_flight.contains(2));
    }

    #[test]
    fn different_sessions_run_side_by_side() {
        let in_flight = InFlight::new();
        let _a = in_flight.claim(1, 100).expect("claim a");
        let _b = in_flight.claim(2, 200).expect("claim b");
        assert_eq!(in_flight.len(), 2);
    }

    #[test]
    fn dropping_claim_releases_order_and_session() {
        let in_flight = InFlight::new();
        let claim = in_flight.claim(1, 100).expect("claim");
        assert!(in_flight.contains(1));
        assert!(in_flight.session_busy(100));
        drop(claim);
        assert!(in_flight.is_empty());
        assert!(!in_flight.session_busy(100));
        assert!(in_flight.claim(1, 100).is_ok());
    }

    #[tokio::test]
    async fn claim_is_released_when_task_panics() {
        let in_flight = InFlight::new();
        let claim = in_flight.claim(7, 700).expect("claim");
        let handle = tokio::spawn(async move {
            let _claim = claim;
            panic!("engine blew up");
        });
        assert!(handle.await.is_err());
        assert!(!in_flight.contains(7));
        assert!(!in_flight.session_busy(700));
    }
}
