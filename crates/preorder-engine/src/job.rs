//! One dispatched job, from `processing` to its terminal status.

use std::sync::Arc;

use preorder_core::{JobFault, OrderStatus, ScheduledOrder};

use crate::delivery::DeliveryCoordinator;
use crate::inflight::Claim;
use crate::messenger::{Messenger, TextFormat};
use crate::progress::ProgressReporter;
use crate::runner::{EngineError, JobControl, PurchaseEngine, PurchaseRequest};
use crate::session::SessionTracker;
use crate::store::{OrderStore, StatusUpdate};

pub struct JobRunner {
    store: Arc<dyn OrderStore>,
    messenger: Arc<dyn Messenger>,
    engine: Arc<dyn PurchaseEngine>,
    sessions: Arc<SessionTracker>,
    reporter: ProgressReporter,
    coordinator: DeliveryCoordinator,
}

impl JobRunner {
    #[must_use]
    pub fn new(
        store: Arc<dyn OrderStore>,
        messenger: Arc<dyn Messenger>,
        engine: Arc<dyn PurchaseEngine>,
        sessions: Arc<SessionTracker>,
        coordinator: DeliveryCoordinator,
    ) -> Self {
        let reporter = ProgressReporter::new(Arc::clone(&messenger), Arc::clone(&sessions));
        Self {
            store,
            messenger,
            engine,
            sessions,
            reporter,
            coordinator,
        }
    }

    /// Execute `order` while holding its dispatch `claim`.
    ///
    /// Returns the terminal status, or `None` when the order could not be
    /// moved to `processing` and was left for the next tick.
    pub async fn run(&self, order: ScheduledOrder, claim: Claim) -> Option<OrderStatus> {
        if let Err(e) = self
            .store
            .update_status(order.id, StatusUpdate::Processing)
            .await
        {
            tracing::warn!(
                order_id = order.id,
                error = %e,
                "scheduler: could not mark order processing; skipping"
            );
            return None;
        }

        let session = order.session_id;
        let job = self.sessions.begin_job(session);
        self.send_starting_notice(&order).await;

        let (control, progress) = JobControl::new(job.clone());
        let renderer = self.reporter.spawn(session, progress);

        let request = PurchaseRequest {
            scheduled_order_id: order.id,
            item: order.item.clone(),
            quantity: order.quantity,
        };
        let engine = Arc::clone(&self.engine);
        let outcome = match tokio::spawn(async move { engine.execute(request, control).await }).await
        {
            Ok(outcome) => outcome,
            Err(e) => Err(EngineError::Failed(JobFault::new(format!(
                "execution engine aborted: {e}"
            )))),
        };

        // Drain the last progress render so its message is tracked for cleanup.
        if let Err(e) = renderer.await {
            tracing::warn!(order_id = order.id, error = %e, "scheduler: progress renderer aborted");
        }

        let status = self.coordinator.finish(&order, &job, outcome).await;
        tracing::info!(
            order_id = order.id,
            session_id = session,
            status = %status,
            "scheduler: job finished"
        );
        drop(claim);
        Some(status)
    }

    async fn send_starting_notice(&self, order: &ScheduledOrder) {
        let text = format!(
            "🚀 Scheduled order #{} is starting: {} × {} ({}).",
            order.id, order.quantity, order.item.variant_name, order.item.game_name
        );
        match self
            .messenger
            .send(order.session_id, &text, TextFormat::Plain)
            .await
        {
            Ok(message) => self.sessions.set_status_message(order.session_id, message),
            Err(e) => {
                tracing::warn!(
                    order_id = order.id,
                    error = %e,
                    "scheduler: failed to send starting notice"
                );
            }
        }
    }
}
