//! In-memory collaborators for engine tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use preorder_core::{
    ExecutionResult, ItemSpec, JobFault, OrderId, OrderStatus, PinRecord, ScheduledOrder,
    SessionId,
};
use tokio::sync::Notify;

use crate::messenger::{MessageRef, MessagingError, Messenger, TextFormat};
use crate::runner::{EngineError, JobControl, PurchaseEngine, PurchaseRequest};
use crate::store::{OrderStore, StatusUpdate, StoreError};

pub fn order(id: OrderId, session: SessionId, quantity: u32) -> ScheduledOrder {
    ScheduledOrder {
        id,
        owner_id: 1,
        session_id: session,
        item: ItemSpec {
            game_name: "Starfall".to_string(),
            game_url: Some("https://store.example/starfall".to_string()),
            variant_name: "1000 Gems".to_string(),
            variant_index: Some(2),
        },
        quantity,
        status: OrderStatus::Pending,
        due_at: Utc::now() - chrono::Duration::minutes(1),
        result_order_id: None,
        failure_reason: None,
    }
}

pub fn future_order(id: OrderId, session: SessionId) -> ScheduledOrder {
    ScheduledOrder {
        due_at: Utc::now() + chrono::Duration::hours(1),
        ..order(id, session, 1)
    }
}

/// `valid` redeemed pins followed by `failed` failed ones.
pub fn result_with(valid: usize, failed: usize, cards_count: u32) -> ExecutionResult {
    let mut pins: Vec<PinRecord> = (1..=valid)
        .map(|i| PinRecord::redeemed(format!("CODE-{i}"), Some(format!("SN-{i}"))))
        .collect();
    pins.extend((0..failed).map(|_| PinRecord::failed(Some("payment".to_string()), "declined")));
    ExecutionResult {
        order_id: "SO-900".to_string(),
        cards_count,
        completed_purchases: u32::try_from(valid + failed).unwrap(),
        pins,
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    orders: HashMap<OrderId, ScheduledOrder>,
    updates: Vec<(OrderId, StatusUpdate)>,
    fail_polls: bool,
    fail_updates: bool,
    stale_reads: bool,
}

#[derive(Default)]
pub struct FakeStore {
    state: Mutex<StoreState>,
}

impl FakeStore {
    pub fn with_orders(orders: impl IntoIterator<Item = ScheduledOrder>) -> Self {
        let store = Self::default();
        for order in orders {
            store.insert(order);
        }
        store
    }

    pub fn insert(&self, order: ScheduledOrder) {
        self.state.lock().unwrap().orders.insert(order.id, order);
    }

    pub fn status(&self, id: OrderId) -> OrderStatus {
        self.state.lock().unwrap().orders[&id].status
    }

    pub fn get(&self, id: OrderId) -> ScheduledOrder {
        self.state.lock().unwrap().orders[&id].clone()
    }

    pub fn updates(&self) -> Vec<(OrderId, StatusUpdate)> {
        self.state.lock().unwrap().updates.clone()
    }

    pub fn fail_polls(&self, fail: bool) {
        self.state.lock().unwrap().fail_polls = fail;
    }

    pub fn fail_updates(&self, fail: bool) {
        self.state.lock().unwrap().fail_updates = fail;
    }

    /// Accept `processing` writes without letting later reads see them.
    pub fn stale_reads(&self, stale: bool) {
        self.state.lock().unwrap().stale_reads = stale;
    }
}

#[async_trait]
impl OrderStore for FakeStore {
    async fn due_orders(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledOrder>, StoreError> {
        let state = self.state.lock().unwrap();
        if state.fail_polls {
            return Err(StoreError::Backend("connection refused".to_string()));
        }
        let mut due: Vec<ScheduledOrder> = state
            .orders
            .values()
            .filter(|o| o.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|o| (o.due_at, o.id));
        Ok(due)
    }

    async fn has_any_pending(&self) -> Result<bool, StoreError> {
        let state = self.state.lock().unwrap();
        if state.fail_polls {
            return Err(StoreError::Backend("connection refused".to_string()));
        }
        Ok(state
            .orders
            .values()
            .any(|o| o.status == OrderStatus::Pending))
    }

    async fn update_status(&self, id: OrderId, update: StatusUpdate) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_updates {
            return Err(StoreError::Backend("write failed".to_string()));
        }
        let target = update.target();
        let stale = state.stale_reads;
        let Some(order) = state.orders.get_mut(&id) else {
            return Err(StoreError::Conflict {
                id,
                target,
                reason: "not found".to_string(),
            });
        };

        let expected = match update {
            StatusUpdate::Processing => OrderStatus::Pending,
            _ => OrderStatus::Processing,
        };
        if order.status != expected {
            return Err(StoreError::Conflict {
                id,
                target,
                reason: format!("status is {}", order.status),
            });
        }

        match &update {
            StatusUpdate::Processing if stale => {}
            StatusUpdate::Processing => order.status = OrderStatus::Processing,
            StatusUpdate::Completed {
                result_order_id, ..
            } => {
                order.status = OrderStatus::Completed;
                order.result_order_id = Some(result_order_id.clone());
            }
            StatusUpdate::Failed { reason } => {
                order.status = OrderStatus::Failed;
                order.failure_reason = Some(reason.clone());
            }
            StatusUpdate::Cancelled { reason, .. } => {
                order.status = OrderStatus::Cancelled;
                order.failure_reason = Some(reason.clone());
            }
        }
        state.updates.push((id, update));
        Ok(())
    }

    async fn fail_interrupted(&self, reason: &str) -> Result<u64, StoreError> {
        let mut state = self.state.lock().unwrap();
        let mut failed = 0;
        for order in state.orders.values_mut() {
            if order.status == OrderStatus::Processing {
                order.status = OrderStatus::Failed;
                order.failure_reason = Some(reason.to_string());
                failed += 1;
            }
        }
        Ok(failed)
    }
}

// ---------------------------------------------------------------------------
// Messenger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub session: SessionId,
    pub id: MessageRef,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub session: SessionId,
    pub path: PathBuf,
    pub file_name: String,
    pub caption: String,
    pub content: String,
}

#[derive(Default)]
struct MessengerState {
    next_id: i64,
    sent: Vec<Sent>,
    edits: Vec<Sent>,
    deletes: Vec<(SessionId, MessageRef)>,
    attachments: Vec<Attachment>,
    fail_edits: bool,
    fail_deletes: bool,
    fail_attachments: bool,
}

#[derive(Default)]
pub struct FakeMessenger {
    state: Mutex<MessengerState>,
}

impl FakeMessenger {
    pub fn sent(&self) -> Vec<Sent> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|s| s.text).collect()
    }

    pub fn edits(&self) -> Vec<Sent> {
        self.state.lock().unwrap().edits.clone()
    }

    pub fn deletes(&self) -> Vec<(SessionId, MessageRef)> {
        self.state.lock().unwrap().deletes.clone()
    }

    pub fn attachments(&self) -> Vec<Attachment> {
        self.state.lock().unwrap().attachments.clone()
    }

    pub fn fail_edits(&self, fail: bool) {
        self.state.lock().unwrap().fail_edits = fail;
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.state.lock().unwrap().fail_deletes = fail;
    }

    pub fn fail_attachments(&self, fail: bool) {
        self.state.lock().unwrap().fail_attachments = fail;
    }
}

#[async_trait]
impl Messenger for FakeMessenger {
    async fn send(
        &self,
        session: SessionId,
        text: &str,
        _format: TextFormat,
    ) -> Result<MessageRef, MessagingError> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = MessageRef(state.next_id);
        state.sent.push(Sent {
            session,
            id,
            text: text.to_string(),
        });
        Ok(id)
    }

    async fn edit(
        &self,
        session: SessionId,
        message: MessageRef,
        text: &str,
        _format: TextFormat,
    ) -> Result<(), MessagingError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_edits {
            return Err(MessagingError::Unaddressable(message));
        }
        state.edits.push(Sent {
            session,
            id: message,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete(&self, session: SessionId, message: MessageRef) -> Result<(), MessagingError> {
        let mut state = self.state.lock().unwrap();
        state.deletes.push((session, message));
        if state.fail_deletes {
            return Err(MessagingError::Unaddressable(message));
        }
        Ok(())
    }

    async fn send_attachment(
        &self,
        session: SessionId,
        path: &Path,
        caption: &str,
    ) -> Result<(), MessagingError> {
        let content = std::fs::read_to_string(path).unwrap();
        let mut state = self.state.lock().unwrap();
        state.attachments.push(Attachment {
            session,
            path: path.to_path_buf(),
            file_name: path.file_name().unwrap().to_string_lossy().into_owned(),
            caption: caption.to_string(),
            content,
        });
        if state.fail_attachments {
            return Err(MessagingError::Transport("upload rejected".to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub enum Script {
    Complete(ExecutionResult),
    Cancel(ExecutionResult),
    Fail(JobFault),
    /// One redeemed pin per step until the job is cancelled or done.
    UntilCancelled,
}

pub struct FakeEngine {
    script: Script,
    gate: Option<Arc<Notify>>,
    started: Notify,
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
    requests: Mutex<Vec<PurchaseRequest>>,
}

impl FakeEngine {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            gate: None,
            started: Notify::new(),
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Hold every execution until `gate` is notified.
    pub fn gated(script: Script, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(script)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<PurchaseRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Resolves once an execution has started.
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }
}

#[async_trait]
impl PurchaseEngine for FakeEngine {
    async fn execute(
        &self,
        request: PurchaseRequest,
        control: JobControl,
    ) -> Result<ExecutionResult, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_running, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.started.notify_one();

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let outcome = match &self.script {
            Script::Complete(result) => {
                control.on_progress(result.completed_purchases, result.cards_count);
                Ok(result.clone())
            }
            Script::Cancel(partial) => Err(EngineError::Cancelled {
                partial: partial.clone(),
            }),
            Script::Fail(fault) => Err(EngineError::Failed(fault.clone())),
            Script::UntilCancelled => {
                let mut result = ExecutionResult {
                    order_id: "SO-LOOP".to_string(),
                    ..ExecutionResult::empty(request.quantity)
                };
                loop {
                    if control.is_cancelled() {
                        break Err(EngineError::Cancelled { partial: result });
                    }
                    if result.completed_purchases == request.quantity {
                        break Ok(result);
                    }
                    result.completed_purchases += 1;
                    result.pins.push(PinRecord::redeemed(
                        format!("LOOP-{}", result.completed_purchases),
                        None,
                    ));
                    control.on_progress(result.completed_purchases, request.quantity);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}
