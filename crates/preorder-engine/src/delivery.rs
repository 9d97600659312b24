//! Terminal-state handling for a finished job.
//!
//! For each outcome the order is: persist the status, clean up ephemeral
//! messages, notify, deliver artifacts, clear session tracking. Status is
//! written before anything is delivered so a delivery failure never leaves a
//! record in `processing`.

use std::sync::Arc;

use preorder_core::{
    classify, format_artifacts, ExecutionResult, JobFault, OrderStatus, ScheduledOrder,
    UserError,
};

use crate::artifacts::{deliver_artifacts, PlainTextFallback};
use crate::messenger::{Messenger, TextFormat};
use crate::runner::{CancelFlag, EngineError};
use crate::session::SessionTracker;
use crate::store::{OrderStore, StatusUpdate};

pub const CANCELLED_BY_USER: &str = "Cancelled by user";

pub struct DeliveryCoordinator {
    store: Arc<dyn OrderStore>,
    messenger: Arc<dyn Messenger>,
    sessions: Arc<SessionTracker>,
    fallback: Option<PlainTextFallback>,
}

impl DeliveryCoordinator {
    #[must_use]
    pub fn new(
        store: Arc<dyn OrderStore>,
        messenger: Arc<dyn Messenger>,
        sessions: Arc<SessionTracker>,
        fallback: Option<PlainTextFallback>,
    ) -> Self {
        Self {
            store,
            messenger,
            sessions,
            fallback,
        }
    }

    /// Reconcile a finished job and return the terminal status it was given.
    ///
    /// A fault whose message reports a user cancellation is routed to the
    /// cancellation branch with an empty partial result.
    pub async fn finish(
        &self,
        order: &ScheduledOrder,
        job: &CancelFlag,
        outcome: Result<ExecutionResult, EngineError>,
    ) -> OrderStatus {
        let status = match outcome {
            Ok(result) => {
                self.completed(order, result).await;
                OrderStatus::Completed
            }
            Err(EngineError::Cancelled { partial }) => {
                self.cancelled(order, partial).await;
                OrderStatus::Cancelled
            }
            Err(EngineError::Failed(fault)) if fault.is_cancellation() => {
                self.cancelled(order, ExecutionResult::empty(order.quantity))
                    .await;
                OrderStatus::Cancelled
            }
            Err(EngineError::Failed(fault)) => {
                self.failed(order, fault).await;
                OrderStatus::Failed
            }
        };

        self.sessions.clear(order.session_id, job);
        status
    }

    async fn completed(&self, order: &ScheduledOrder, result: ExecutionResult) {
        let valid = result.valid_count();
        let failed = result.failed_count();
        self.persist(
            order,
            StatusUpdate::Completed {
                result_order_id: result.order_id.clone(),
                delivered: count(valid),
            },
        )
        .await;
        self.delete_ephemeral(order).await;

        let mut notice = format!(
            "✅ Scheduled order #{} completed: {valid} card(s) purchased",
            order.id
        );
        if failed > 0 {
            notice.push_str(&format!(", {failed} card(s) failed"));
        }
        notice.push('.');
        self.notify(order, &notice).await;

        self.deliver(order, &result, false).await;
        tracing::info!(
            order_id = order.id,
            session_id = order.session_id,
            valid,
            failed,
            "delivery: order completed"
        );
    }

    async fn cancelled(&self, order: &ScheduledOrder, partial: ExecutionResult) {
        let valid = partial.valid_count();
        let failed = partial.failed_count();
        self.persist(
            order,
            StatusUpdate::Cancelled {
                reason: CANCELLED_BY_USER.to_string(),
                delivered: count(valid),
            },
        )
        .await;
        self.delete_ephemeral(order).await;

        if valid == 0 {
            self.notify(
                order,
                &format!(
                    "🛑 Scheduled order #{} cancelled: no cards processed.",
                    order.id
                ),
            )
            .await;
        } else {
            self.notify(
                order,
                &format!(
                    "🛑 Scheduled order #{} cancelled.\n{valid} card(s) completed, {failed} card(s) failed.",
                    order.id
                ),
            )
            .await;
            self.deliver(order, &partial, true).await;

            let remaining = partial.remaining();
            if remaining > 0 {
                self.notify(
                    order,
                    &format!("ℹ️ {remaining} remaining card(s) were not processed."),
                )
                .await;
            }
        }

        tracing::info!(
            order_id = order.id,
            session_id = order.session_id,
            valid,
            failed,
            remaining = partial.remaining(),
            "delivery: order cancelled"
        );
    }

    async fn failed(&self, order: &ScheduledOrder, fault: JobFault) {
        self.persist(
            order,
            StatusUpdate::Failed {
                reason: fault.to_string(),
            },
        )
        .await;
        self.delete_ephemeral(order).await;

        let user_error = classify(&fault).unwrap_or_else(|| UserError::Generic {
            message: fault.message.clone(),
        });
        self.notify(order, &user_error.user_message()).await;

        tracing::warn!(
            order_id = order.id,
            session_id = order.session_id,
            fault = %fault,
            "delivery: order failed"
        );
    }

    async fn persist(&self, order: &ScheduledOrder, update: StatusUpdate) {
        let target = update.target();
        if let Err(e) = self.store.update_status(order.id, update).await {
            tracing::error!(
                order_id = order.id,
                target,
                error = %e,
                "delivery: failed to persist terminal status"
            );
        }
    }

    async fn delete_ephemeral(&self, order: &ScheduledOrder) {
        for message in self.sessions.ephemeral_messages(order.session_id).iter() {
            if let Err(e) = self.messenger.delete(order.session_id, message).await {
                tracing::warn!(
                    order_id = order.id,
                    session_id = order.session_id,
                    error = %e,
                    "delivery: failed to delete ephemeral message"
                );
            }
        }
    }

    async fn notify(&self, order: &ScheduledOrder, text: &str) {
        if let Err(e) = self
            .messenger
            .send(order.session_id, text, TextFormat::Plain)
            .await
        {
            tracing::warn!(
                order_id = order.id,
                session_id = order.session_id,
                error = %e,
                "delivery: failed to send notice"
            );
        }
    }

    async fn deliver(&self, order: &ScheduledOrder, result: &ExecutionResult, partial: bool) {
        let artifacts = format_artifacts(order.id, &result.pins, partial);
        if let Err(e) = deliver_artifacts(
            self.messenger.as_ref(),
            order.session_id,
            &artifacts,
            self.fallback,
        )
        .await
        {
            tracing::error!(
                order_id = order.id,
                session_id = order.session_id,
                error = %e,
                "delivery: artifact delivery failed"
            );
        }
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[cfg(test)]
#[path = "delivery_test.rs"]
mod tests;
