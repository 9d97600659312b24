//! Poll-driven dispatcher for due scheduled orders.
//!
//! The poll loop is a repeating [`JobScheduler`] job that only exists while
//! the backlog has pending records: [`Scheduler::ensure_active`] registers it
//! and [`Scheduler::stop_if_idle`] removes it. Each tick dispatches due orders
//! as independent tasks, guarded by [`InFlight`] so an order (or a session) is
//! never executed twice at once.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use preorder_core::{AppConfig, OrderId, SessionId};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use uuid::Uuid;

use crate::artifacts::{chunked_plain_text, PlainTextFallback};
use crate::delivery::DeliveryCoordinator;
use crate::inflight::{DispatchConflict, InFlight};
use crate::job::JobRunner;
use crate::messenger::Messenger;
use crate::runner::PurchaseEngine;
use crate::session::SessionTracker;
use crate::store::{OrderStore, StoreError};

pub const INTERRUPTED_BY_RESTART: &str = "Interrupted by restart";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    /// Deliver artifacts as plain messages when attachments fail.
    pub plain_text_fallback: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            plain_text_fallback: true,
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            plain_text_fallback: config.plain_text_fallback,
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job scheduler error: {0}")]
    Cron(#[from] JobSchedulerError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a single tick did.
#[derive(Debug)]
pub enum TickOutcome {
    /// The previous tick was still running; this one did nothing.
    Busy,
    /// The backlog query failed; nothing changed.
    PollFailed,
    /// Nothing was due. `stopped` reports whether the loop is now stopped.
    Idle { stopped: bool },
    Dispatched {
        dispatched: Vec<OrderId>,
        /// Due orders held back by a running job for the same order or session.
        skipped: Vec<OrderId>,
        tasks: Vec<JoinHandle<()>>,
    },
}

struct Inner {
    store: Arc<dyn OrderStore>,
    sessions: Arc<SessionTracker>,
    runner: Arc<JobRunner>,
    in_flight: InFlight,
    cron: JobScheduler,
    poll_job: Mutex<Option<Uuid>>,
    tick_lock: Mutex<()>,
    config: SchedulerConfig,
}

/// Cheap to clone; every clone drives the same poll loop.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Build the scheduler and start its (initially empty) job runner.
    ///
    /// The poll loop is not running until [`Scheduler::ensure_active`] finds
    /// pending work.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Cron`] if the job scheduler cannot start.
    pub async fn new(
        store: Arc<dyn OrderStore>,
        messenger: Arc<dyn Messenger>,
        engine: Arc<dyn PurchaseEngine>,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        let sessions = Arc::new(SessionTracker::new());
        let fallback = config
            .plain_text_fallback
            .then_some(chunked_plain_text as PlainTextFallback);
        let coordinator = DeliveryCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&messenger),
            Arc::clone(&sessions),
            fallback,
        );
        let runner = Arc::new(JobRunner::new(
            Arc::clone(&store),
            messenger,
            engine,
            Arc::clone(&sessions),
            coordinator,
        ));

        let cron = JobScheduler::new().await?;
        cron.start().await?;

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                sessions,
                runner,
                in_flight: InFlight::new(),
                cron,
                poll_job: Mutex::new(None),
                tick_lock: Mutex::new(()),
                config,
            }),
        })
    }

    /// Start the poll loop if any order is pending and it is not running.
    ///
    /// Returns whether the loop is running afterwards. Safe to call at any
    /// time, any number of times.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] if the backlog cannot be read or the poll
    /// job cannot be registered.
    pub async fn ensure_active(&self) -> Result<bool, SchedulerError> {
        let mut poll_job = self.inner.poll_job.lock().await;
        if poll_job.is_some() {
            return Ok(true);
        }
        if !self.inner.store.has_any_pending().await? {
            tracing::debug!("scheduler: no pending orders; poll loop stays stopped");
            return Ok(false);
        }

        self.register_poll_job(&mut poll_job).await?;
        Ok(true)
    }

    /// Start the poll loop after a record was created, without reading the
    /// backlog first.
    ///
    /// Returns whether the loop was already running. An empty backlog is
    /// noticed by the next tick, which stops the loop again.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Cron`] if the poll job cannot be registered.
    pub async fn wake(&self) -> Result<bool, SchedulerError> {
        let mut poll_job = self.inner.poll_job.lock().await;
        if poll_job.is_some() {
            return Ok(true);
        }
        self.register_poll_job(&mut poll_job).await?;
        Ok(false)
    }

    /// Call [`Scheduler::wake`] until it succeeds, waiting `retry` between
    /// attempts.
    pub fn wake_until_active(&self, retry: Duration) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut attempt: u32 = 1;
            loop {
                match scheduler.wake().await {
                    Ok(_) => {
                        if attempt > 1 {
                            tracing::info!(attempt, "scheduler: poll loop woken after retry");
                        }
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(
                            attempt,
                            error = %e,
                            retry = ?retry,
                            "scheduler: wake failed; retrying"
                        );
                    }
                }
                attempt = attempt.saturating_add(1);
                tokio::time::sleep(retry).await;
            }
        })
    }

    async fn register_poll_job(&self, poll_job: &mut Option<Uuid>) -> Result<(), SchedulerError> {
        let weak = Arc::downgrade(&self.inner);
        let job = Job::new_repeated_async(self.inner.config.poll_interval, move |_uuid, _lock| {
            let weak: Weak<Inner> = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    Scheduler { inner }.tick().await;
                }
            })
        })?;
        let id = self.inner.cron.add(job).await?;
        *poll_job = Some(id);

        tracing::info!(
            interval_secs = self.inner.config.poll_interval.as_secs(),
            "scheduler: poll loop started"
        );
        Ok(())
    }

    /// Stop the poll loop when no order is pending, due or not.
    ///
    /// Returns whether the loop is stopped afterwards. A backlog read failure
    /// keeps the loop running.
    pub async fn stop_if_idle(&self) -> bool {
        let mut poll_job = self.inner.poll_job.lock().await;
        let Some(id) = *poll_job else {
            return true;
        };

        match self.inner.store.has_any_pending().await {
            Ok(true) => false,
            Ok(false) => {
                if let Err(e) = self.inner.cron.remove(&id).await {
                    tracing::error!(error = %e, "scheduler: failed to remove poll job");
                    return false;
                }
                *poll_job = None;
                tracing::info!("scheduler: backlog empty; poll loop stopped");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "scheduler: backlog check failed; poll loop kept");
                false
            }
        }
    }

    /// Run one poll: dispatch every due order that is not already running.
    ///
    /// Ticks never overlap: a tick that starts while another is in progress
    /// returns [`TickOutcome::Busy`].
    pub async fn tick(&self) -> TickOutcome {
        let Ok(_guard) = self.inner.tick_lock.try_lock() else {
            tracing::debug!("scheduler: previous tick still running");
            return TickOutcome::Busy;
        };

        let due = match self.inner.store.due_orders(Utc::now()).await {
            Ok(due) => due,
            Err(e) => {
                tracing::error!(error = %e, "scheduler: failed to load due orders");
                return TickOutcome::PollFailed;
            }
        };

        if due.is_empty() {
            let stopped = self.stop_if_idle().await;
            return TickOutcome::Idle { stopped };
        }

        // Claim everything first so a job finishing mid-tick cannot free its
        // session for another order in the same batch.
        let mut claimed = Vec::new();
        let mut skipped = Vec::new();
        for order in due {
            match self.inner.in_flight.claim(order.id, order.session_id) {
                Ok(claim) => claimed.push((order, claim)),
                Err(conflict) => {
                    let reason = match conflict {
                        DispatchConflict::OrderRunning => "order already running",
                        DispatchConflict::SessionBusy => "session busy",
                    };
                    tracing::debug!(
                        order_id = order.id,
                        session_id = order.session_id,
                        reason,
                        "scheduler: order skipped"
                    );
                    skipped.push(order.id);
                }
            }
        }

        let mut dispatched = Vec::with_capacity(claimed.len());
        let mut tasks = Vec::with_capacity(claimed.len());
        for (order, claim) in claimed {
            tracing::info!(
                order_id = order.id,
                session_id = order.session_id,
                quantity = order.quantity,
                "scheduler: dispatching order"
            );
            dispatched.push(order.id);
            let runner = Arc::clone(&self.inner.runner);
            tasks.push(tokio::spawn(async move {
                runner.run(order, claim).await;
            }));
        }

        TickOutcome::Dispatched {
            dispatched,
            skipped,
            tasks,
        }
    }

    /// Ask the job running in `session` to stop at its next checkpoint.
    ///
    /// Returns `false` when nothing is running there.
    pub fn request_cancel(&self, session: SessionId) -> bool {
        let accepted = self.inner.sessions.request_cancel(session);
        tracing::info!(session_id = session, accepted, "scheduler: cancellation requested");
        accepted
    }

    /// Fail orders a previous process left in `processing`.
    ///
    /// They are not re-run: purchases may already have gone through.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    pub async fn recover_interrupted(&self) -> Result<u64, StoreError> {
        let recovered = self
            .inner
            .store
            .fail_interrupted(INTERRUPTED_BY_RESTART)
            .await?;
        if recovered > 0 {
            tracing::warn!(recovered, "scheduler: failed orders interrupted by restart");
        }
        Ok(recovered)
    }

    pub async fn is_active(&self) -> bool {
        self.inner.poll_job.lock().await.is_some()
    }

    #[must_use]
    pub fn running_jobs(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Stop the poll loop and the underlying job scheduler.
    ///
    /// Jobs already dispatched keep running until the runtime shuts down.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Cron`] if the job scheduler fails to stop.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        let mut poll_job = self.inner.poll_job.lock().await;
        if let Some(id) = poll_job.take() {
            self.inner.cron.remove(&id).await?;
        }
        let mut cron = self.inner.cron.clone();
        cron.shutdown().await?;
        tracing::info!("scheduler: shut down");
        Ok(())
    }
}

#[cfg(test)]
#[path = "scheduler_test.rs"]
mod tests;
