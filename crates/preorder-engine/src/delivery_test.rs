use std::sync::Arc;

use preorder_core::{JobFault, OrderStatus, ScheduledOrder, UserError};

use super::*;
use crate::artifacts::chunked_plain_text;
use crate::messenger::MessageRef;
use crate::test_support::{order, result_with, FakeMessenger, FakeStore};

struct Harness {
    store: Arc<FakeStore>,
    messenger: Arc<FakeMessenger>,
    sessions: Arc<SessionTracker>,
    coordinator: DeliveryCoordinator,
    order: ScheduledOrder,
    job: CancelFlag,
}

/// An order already marked `processing` with a starting notice and a
/// progress message on screen.
fn harness(quantity: u32, fallback: Option<PlainTextFallback>) -> Harness {
    let mut order = order(42, 7, quantity);
    order.status = OrderStatus::Processing;
    let store = Arc::new(FakeStore::with_orders([order.clone()]));
    let messenger = Arc::new(FakeMessenger::default());
    let sessions = Arc::new(SessionTracker::new());

    let job = sessions.begin_job(order.session_id);
    sessions.set_status_message(order.session_id, MessageRef(100));
    sessions.set_progress(order.session_id, MessageRef(101), "progress".to_string());

    let s: Arc<dyn OrderStore> = store.clone();
    let m: Arc<dyn Messenger> = messenger.clone();
    let coordinator = DeliveryCoordinator::new(s, m, Arc::clone(&sessions), fallback);

    Harness {
        store,
        messenger,
        sessions,
        coordinator,
        order,
        job,
    }
}

fn deleted(h: &Harness) -> Vec<MessageRef> {
    h.messenger.deletes().into_iter().map(|(_, m)| m).collect()
}

#[tokio::test]
async fn completion_persists_cleans_up_and_delivers() {
    let h = harness(3, None);

    let status = h
        .coordinator
        .finish(&h.order, &h.job, Ok(result_with(3, 0, 3)))
        .await;

    assert_eq!(status, OrderStatus::Completed);
    assert_eq!(
        h.store.updates(),
        vec![(
            42,
            StatusUpdate::Completed {
                result_order_id: "SO-900".to_string(),
                delivered: 3,
            }
        )]
    );
    assert_eq!(h.store.get(42).result_order_id.as_deref(), Some("SO-900"));
    assert_eq!(deleted(&h), vec![MessageRef(101), MessageRef(100)]);

    let texts = h.messenger.texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("completed: 3 card(s) purchased"));

    let attachments = h.messenger.attachments();
    assert_eq!(attachments.len(), 2);
    assert_eq!(attachments[0].file_name, "order_42_codes_with_serials.txt");
    assert_eq!(attachments[1].file_name, "order_42_codes.txt");
    assert!(!h.sessions.is_tracked(7));
}

#[tokio::test]
async fn completion_notice_mentions_failed_units() {
    let h = harness(3, None);

    h.coordinator
        .finish(&h.order, &h.job, Ok(result_with(2, 1, 3)))
        .await;

    let texts = h.messenger.texts();
    assert!(texts[0].contains("2 card(s) purchased, 1 card(s) failed"));
    assert_eq!(h.messenger.attachments()[1].content, "CODE-1\nCODE-2\n");
}

#[tokio::test]
async fn cancellation_with_partial_result_reports_and_delivers_valid_entries() {
    let h = harness(5, None);
    let partial = result_with(3, 1, 5);

    let status = h
        .coordinator
        .finish(&h.order, &h.job, Err(EngineError::Cancelled { partial }))
        .await;

    assert_eq!(status, OrderStatus::Cancelled);
    assert_eq!(
        h.store.updates(),
        vec![(
            42,
            StatusUpdate::Cancelled {
                reason: "Cancelled by user".to_string(),
                delivered: 3,
            }
        )]
    );
    assert_eq!(h.store.get(42).failure_reason.as_deref(), Some("Cancelled by user"));
    assert_eq!(deleted(&h), vec![MessageRef(101), MessageRef(100)]);

    let texts = h.messenger.texts();
    assert_eq!(texts.len(), 2);
    assert!(texts[0].contains("3 card(s) completed, 1 card(s) failed"));
    assert!(texts[1].contains("1 remaining card(s) were not processed"));

    let attachments = h.messenger.attachments();
    assert_eq!(attachments.len(), 2);
    assert_eq!(attachments[0].file_name, "order_42_partial_codes_with_serials.txt");
    assert_eq!(attachments[1].content, "CODE-1\nCODE-2\nCODE-3\n");
    assert_eq!(attachments[0].content.matches("Code: ").count(), 3);
    assert!(!h.sessions.is_tracked(7));
}

#[tokio::test]
async fn cancellation_with_everything_accounted_for_sends_no_remainder_notice() {
    let h = harness(4, None);

    h.coordinator
        .finish(
            &h.order,
            &h.job,
            Err(EngineError::Cancelled {
                partial: result_with(3, 1, 4),
            }),
        )
        .await;

    let texts = h.messenger.texts();
    assert_eq!(texts.len(), 1);
    assert!(!texts[0].contains("remaining"));
}

#[tokio::test]
async fn cancellation_with_zero_progress_sends_notice_and_no_artifacts() {
    let h = harness(5, None);

    let status = h
        .coordinator
        .finish(
            &h.order,
            &h.job,
            Err(EngineError::Cancelled {
                partial: result_with(0, 0, 5),
            }),
        )
        .await;

    assert_eq!(status, OrderStatus::Cancelled);
    let texts = h.messenger.texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("no cards processed"));
    assert!(h.messenger.attachments().is_empty());
    assert!(!h.sessions.is_tracked(7));
}

#[tokio::test]
async fn cancellation_message_fault_takes_cancellation_branch() {
    let h = harness(5, None);
    let fault = JobFault::new("Purchase cancelled by user").with_stage("checkout");

    let status = h
        .coordinator
        .finish(&h.order, &h.job, Err(EngineError::Failed(fault)))
        .await;

    assert_eq!(status, OrderStatus::Cancelled);
    let texts = h.messenger.texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("no cards processed"));
    assert!(!texts[0].contains("failed"));
}

#[tokio::test]
async fn hard_failure_persists_and_sends_classified_message() {
    let h = harness(2, None);
    let fault = JobFault::new("listing gone")
        .with_code("OUT_OF_STOCK")
        .with_stage("select_variant");

    let status = h
        .coordinator
        .finish(&h.order, &h.job, Err(EngineError::Failed(fault)))
        .await;

    assert_eq!(status, OrderStatus::Failed);
    assert_eq!(h.store.status(42), OrderStatus::Failed);
    assert_eq!(
        h.store.get(42).failure_reason.as_deref(),
        Some("listing gone (stage: select_variant)")
    );
    assert_eq!(
        h.messenger.texts(),
        vec![UserError::StockUnavailable.user_message()]
    );
    assert!(h.messenger.attachments().is_empty());
    assert!(!h.sessions.is_tracked(7));
}

#[tokio::test]
async fn failed_status_write_does_not_block_delivery() {
    let h = harness(2, None);
    h.store.fail_updates(true);

    let status = h
        .coordinator
        .finish(&h.order, &h.job, Ok(result_with(2, 0, 2)))
        .await;

    assert_eq!(status, OrderStatus::Completed);
    assert!(h.store.updates().is_empty());
    assert_eq!(h.messenger.attachments().len(), 2);
    assert!(!h.sessions.is_tracked(7));
}

#[tokio::test]
async fn failed_message_deletion_is_not_fatal() {
    let h = harness(1, None);
    h.messenger.fail_deletes(true);

    h.coordinator
        .finish(&h.order, &h.job, Ok(result_with(1, 0, 1)))
        .await;

    assert_eq!(h.store.status(42), OrderStatus::Completed);
    assert_eq!(h.messenger.texts().len(), 1);
    assert_eq!(h.messenger.attachments().len(), 2);
}

#[tokio::test]
async fn artifact_failure_leaves_status_persisted() {
    let h = harness(1, None);
    h.messenger.fail_attachments(true);

    h.coordinator
        .finish(&h.order, &h.job, Ok(result_with(1, 0, 1)))
        .await;

    assert_eq!(h.store.status(42), OrderStatus::Completed);
    assert_eq!(h.messenger.attachments().len(), 1);
    assert!(!h.sessions.is_tracked(7));
}

#[tokio::test]
async fn artifact_failure_with_fallback_sends_plain_text() {
    let h = harness(1, Some(chunked_plain_text));
    h.messenger.fail_attachments(true);

    h.coordinator
        .finish(&h.order, &h.job, Ok(result_with(1, 0, 1)))
        .await;

    let texts = h.messenger.texts();
    assert_eq!(texts.len(), 3);
    assert!(texts[1].contains("Code: CODE-1\nSerial: SN-1"));
    assert!(texts[2].ends_with("CODE-1"));
}
