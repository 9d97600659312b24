//! Contract between the scheduler and the external execution engine.
//!
//! The engine receives a [`JobControl`] it uses to publish progress and to
//! poll for cancellation at its own checkpoints. It answers with a complete
//! [`ExecutionResult`] or an [`EngineError`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use preorder_core::{ExecutionResult, ItemSpec, JobFault, OrderId};
use thiserror::Error;
use tokio::sync::watch;

/// Cooperative cancellation flag owned by exactly one running job.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Whether `other` is a handle to the same job's flag.
    #[must_use]
    pub fn same_job(&self, other: &CancelFlag) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: u32,
    pub total: u32,
}

/// Handed to the engine for the duration of one job.
///
/// Progress publishing never blocks: only the latest value is kept, so bursts
/// collapse into a single render.
#[derive(Debug)]
pub struct JobControl {
    progress: watch::Sender<Option<Progress>>,
    cancel: CancelFlag,
}

impl JobControl {
    #[must_use]
    pub fn new(cancel: CancelFlag) -> (Self, watch::Receiver<Option<Progress>>) {
        let (progress, rx) = watch::channel(None);
        (Self { progress, cancel }, rx)
    }

    pub fn on_progress(&self, completed: u32, total: u32) {
        self.progress
            .send_replace(Some(Progress { completed, total }));
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// What the engine is asked to buy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseRequest {
    pub scheduled_order_id: OrderId,
    pub item: ItemSpec,
    pub quantity: u32,
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// Stopped at a cancellation checkpoint; purchases made so far are kept.
    #[error(
        "cancelled by user after {} of {} purchases",
        .partial.completed_purchases,
        .partial.cards_count
    )]
    Cancelled { partial: ExecutionResult },
    #[error("{0}")]
    Failed(JobFault),
}

#[async_trait]
pub trait PurchaseEngine: Send + Sync {
    async fn execute(
        &self,
        request: PurchaseRequest,
        control: JobControl,
    ) -> Result<ExecutionResult, EngineError>;
}
