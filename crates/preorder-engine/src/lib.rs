//! Scheduled-order execution engine.
//!
//! [`Scheduler`] polls an [`OrderStore`] for due orders and runs each one
//! through a [`PurchaseEngine`], reporting progress and results through a
//! [`Messenger`]. The three collaborator traits are the only seams to the
//! outside world; concrete implementations live in their own crates.

pub mod artifacts;
pub mod backoff;
pub mod delivery;
pub mod inflight;
pub mod job;
pub mod messenger;
pub mod progress;
pub mod runner;
pub mod scheduler;
pub mod session;
pub mod store;

#[cfg(test)]
mod test_support;

pub use artifacts::{chunked_plain_text, deliver_artifacts, DeliveryError, PlainTextFallback};
pub use backoff::{retry_with_backoff, Backoff, RetryDecision};
pub use delivery::{DeliveryCoordinator, CANCELLED_BY_USER};
pub use inflight::{Claim, DispatchConflict, InFlight};
pub use messenger::{MessageRef, MessagingError, Messenger, TextFormat};
pub use runner::{CancelFlag, EngineError, JobControl, Progress, PurchaseEngine, PurchaseRequest};
pub use scheduler::{
    Scheduler, SchedulerConfig, SchedulerError, TickOutcome, INTERRUPTED_BY_RESTART,
};
pub use session::SessionTracker;
pub use store::{OrderStore, StatusUpdate, StoreError};
