mod common;

use serde_json::json;

use charmlink_engine::dispatcher::DispatchOutcome;
use charmlink_types::envelope::EnvelopeType;
use charmlink_types::models::{MessageState, NotifyState, TxStatus};

use common::{BOB, Harness, envelope};

#[tokio::test]
async fn deferred_charm_is_announced_after_confirmation() {
    let h = Harness::new().await;
    h.ledger.set_deferred(true);

    let message = h.engine.send_charm(BOB, "sparkle", 20).await.unwrap();
    assert_eq!(message.state, MessageState::Pending);
    assert_eq!(message.amount, 20);
    let correlation_id = message.correlation_id.unwrap();

    let entry = h.engine.tracker().find_by_correlation(correlation_id).await.unwrap().unwrap();
    assert_eq!(entry.status, TxStatus::Pending);
    assert_eq!(entry.ledger_op_id.as_deref(), Some("op-1"));
    assert_eq!(entry.approval_queue_id.as_deref(), Some("queue-op-1"));
    assert!(h.transport.sent().await.is_empty());

    // Still waiting on the user
    let report = h.engine.poller().run_cycle().await.unwrap();
    assert_eq!(report.confirmed, 0);
    assert_eq!(h.state_of(message.id).await, MessageState::Pending);
    assert!(h.transport.sent().await.is_empty());

    h.ledger.approve("op-1").await;
    let report = h.engine.poller().run_cycle().await.unwrap();
    assert_eq!(report.confirmed, 1);
    assert_eq!(report.notified, 1);

    assert_eq!(h.state_of(message.id).await, MessageState::Sent);
    let charms = h.transport.sent_of_kind("charm").await;
    assert_eq!(charms.len(), 1);
    assert_eq!(charms[0].destination, BOB);
    assert_eq!(charms[0].envelope.message, "sparkle");
    assert_eq!(charms[0].envelope.amount, Some(json!(20)));
    assert_eq!(charms[0].envelope.timestamp, Some(json!(correlation_id)));

    let entry = h.engine.tracker().find_by_correlation(correlation_id).await.unwrap().unwrap();
    assert_eq!(entry.status, TxStatus::Confirmed);
    assert_eq!(entry.notify_state, NotifyState::Sent);

    // Nothing left to do
    let report = h.engine.poller().run_cycle().await.unwrap();
    assert_eq!(report.confirmed, 0);
    assert_eq!(report.notified, 0);
    assert_eq!(h.transport.sent_of_kind("charm").await.len(), 1);
}

#[tokio::test]
async fn inbound_text_gets_exactly_one_receipt() {
    let h = Harness::new().await;

    let outcome = h
        .engine
        .dispatcher()
        .dispatch("X", envelope(EnvelopeType::Text, "hello"))
        .await
        .unwrap();
    assert!(matches!(outcome, DispatchOutcome::Stored(_)));

    let rows = h.engine.get_messages("X").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].payload, "hello");
    assert!(!rows[0].own);

    let sent = h.transport.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].envelope.kind, "delivery_receipt");
    assert_eq!(sent[0].destination, "X");
    assert_eq!(sent[0].channel, common::APP);
}

#[tokio::test]
async fn ping_is_answered_without_touching_store_or_presence() {
    let h = Harness::new().await;

    let outcome = h
        .engine
        .dispatcher()
        .dispatch("Y", envelope(EnvelopeType::Ping, ""))
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::PongSent(true));

    let sent = h.transport.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].envelope.kind, "pong");
    assert_eq!(sent[0].destination, "Y");

    assert!(h.engine.get_messages("Y").await.unwrap().is_empty());
    assert_eq!(h.engine.presence().is_installed("Y").await, None);

    // Only a pong on this side says anything about Y
    h.engine
        .dispatcher()
        .dispatch("Y", envelope(EnvelopeType::Pong, ""))
        .await
        .unwrap();
    assert_eq!(h.engine.presence().is_installed("Y").await, Some(true));
}

#[tokio::test]
async fn rejected_token_fails_without_notification() {
    let h = Harness::new().await;
    h.ledger.set_deferred(true);

    let message = h.engine.send_token(BOB, "USDC", 7).await.unwrap();
    assert_eq!(message.state, MessageState::Pending);

    h.ledger.reject("op-1").await;
    let report = h.engine.poller().run_cycle().await.unwrap();
    assert_eq!(report.rejected, 1);
    assert_eq!(report.notified, 0);

    assert_eq!(h.state_of(message.id).await, MessageState::Failed);
    let entry = h
        .engine
        .tracker()
        .find_by_correlation(message.correlation_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, TxStatus::Rejected);

    h.engine.poller().run_cycle().await.unwrap();
    assert!(h.transport.sent().await.is_empty());
}
