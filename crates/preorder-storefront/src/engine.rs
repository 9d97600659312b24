use async_trait::async_trait;
use preorder_core::{ExecutionResult, OrderId, PinRecord};
use preorder_engine::{EngineError, JobControl, PurchaseEngine, PurchaseRequest};

use crate::client::StorefrontClient;

/// Drives one scheduled order through the automation service, one unit per
/// request.
///
/// Cancellation is checked before the order is opened and before every unit.
/// A unit the service reports as `PURCHASE_FAILED` is recorded and skipped;
/// any other error ends the job.
#[derive(Debug)]
pub struct StorefrontEngine {
    client: StorefrontClient,
}

impl StorefrontEngine {
    #[must_use]
    pub fn new(client: StorefrontClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PurchaseEngine for StorefrontEngine {
    async fn execute(
        &self,
        request: PurchaseRequest,
        control: JobControl,
    ) -> Result<ExecutionResult, EngineError> {
        let mut result = ExecutionResult::empty(request.quantity);
        if control.is_cancelled() {
            return Err(EngineError::Cancelled { partial: result });
        }

        result.order_id = self
            .client
            .create_order(request.scheduled_order_id, &request.item, request.quantity)
            .await
            .map_err(|e| EngineError::Failed(e.into_fault("create_order")))?;
        tracing::info!(
            order_id = request.scheduled_order_id,
            storefront_order = %result.order_id,
            quantity = request.quantity,
            "storefront: order opened"
        );
        control.on_progress(0, request.quantity);

        for unit in 1..=request.quantity {
            if control.is_cancelled() {
                tracing::info!(
                    order_id = request.scheduled_order_id,
                    completed = result.completed_purchases,
                    "storefront: stopping at cancellation checkpoint"
                );
                return Err(EngineError::Cancelled { partial: result });
            }

            match self.client.purchase(&result.order_id, unit).await {
                Ok(purchase) => result.pins.push(PinRecord {
                    transaction_id: purchase.transaction_id,
                    ..PinRecord::redeemed(purchase.code, purchase.serial_number)
                }),
                Err(e) if e.is_unit_failure() => {
                    tracing::warn!(
                        order_id = request.scheduled_order_id,
                        unit,
                        error = %e,
                        "storefront: unit failed, continuing"
                    );
                    let fault = e.into_fault("purchase");
                    result.pins.push(PinRecord::failed(fault.stage, fault.message));
                }
                Err(e) => {
                    let fault = e.into_fault("purchase");
                    log_abandoned_purchases(request.scheduled_order_id, &result);
                    return Err(EngineError::Failed(fault));
                }
            }

            result.completed_purchases += 1;
            control.on_progress(result.completed_purchases, request.quantity);
        }

        Ok(result)
    }
}

/// Transaction ids of the units already paid for in `result`.
fn paid_transactions(result: &ExecutionResult) -> Vec<&str> {
    result
        .valid_pins()
        .filter_map(|p| p.transaction_id.as_deref())
        .collect()
}

/// A hard failure drops the partial result; leave the paid units in the log
/// so they can be recovered by hand.
fn log_abandoned_purchases(scheduled_order_id: OrderId, result: &ExecutionResult) {
    let valid = result.valid_count();
    if valid == 0 {
        return;
    }
    tracing::warn!(
        order_id = scheduled_order_id,
        storefront_order = %result.order_id,
        purchased = valid,
        transactions = ?paid_transactions(result),
        "storefront: job failed after purchases went through"
    );
}
