mod common;

use charmlink_engine::dispatcher::DispatchOutcome;
use charmlink_protocol::to_wire;
use charmlink_types::envelope::EnvelopeType;
use charmlink_types::models::MessageState;

use common::{BOB, Harness, envelope};

#[tokio::test]
async fn read_receipt_spares_pending_and_failed() {
    let h = Harness::new().await;
    let sent = h.seed(BOB, true, MessageState::Sent).await;
    let delivered = h.seed(BOB, true, MessageState::Delivered).await;
    let pending = h.seed(BOB, true, MessageState::Pending).await;
    let failed = h.seed(BOB, true, MessageState::Failed).await;
    let zombie = h.seed(BOB, true, MessageState::Zombie).await;
    let inbound = h.seed(BOB, false, MessageState::Sent).await;

    let outcome = h
        .engine
        .dispatcher()
        .dispatch(BOB, envelope(EnvelopeType::Read, ""))
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::ReceiptApplied(2));

    assert_eq!(h.state_of(sent).await, MessageState::Read);
    assert_eq!(h.state_of(delivered).await, MessageState::Read);
    assert_eq!(h.state_of(pending).await, MessageState::Pending);
    assert_eq!(h.state_of(failed).await, MessageState::Failed);
    assert_eq!(h.state_of(zombie).await, MessageState::Zombie);
    assert_eq!(h.state_of(inbound).await, MessageState::Sent);
}

#[tokio::test]
async fn delivery_receipt_is_idempotent() {
    let h = Harness::new().await;
    let a = h.seed(BOB, true, MessageState::Sent).await;
    let b = h.seed(BOB, true, MessageState::Read).await;
    let c = h.seed(BOB, true, MessageState::Pending).await;

    let receipt = envelope(EnvelopeType::DeliveryReceipt, "");
    let first = h.engine.dispatcher().dispatch(BOB, receipt.clone()).await.unwrap();
    let after_once = h.engine.get_messages(BOB).await.unwrap();

    let second = h.engine.dispatcher().dispatch(BOB, receipt).await.unwrap();
    let after_twice = h.engine.get_messages(BOB).await.unwrap();

    assert_eq!(first, DispatchOutcome::ReceiptApplied(1));
    assert_eq!(second, DispatchOutcome::ReceiptApplied(0));
    assert_eq!(after_once, after_twice);
    assert_eq!(h.state_of(a).await, MessageState::Delivered);
    assert_eq!(h.state_of(b).await, MessageState::Read);
    assert_eq!(h.state_of(c).await, MessageState::Pending);
}

#[tokio::test]
async fn receipts_are_scoped_to_their_sender() {
    let h = Harness::new().await;
    let to_bob = h.seed(BOB, true, MessageState::Sent).await;
    let to_carol = h.seed("carol-key", true, MessageState::Sent).await;

    h.engine
        .dispatcher()
        .dispatch("carol-key", envelope(EnvelopeType::Read, ""))
        .await
        .unwrap();

    assert_eq!(h.state_of(to_bob).await, MessageState::Sent);
    assert_eq!(h.state_of(to_carol).await, MessageState::Read);
}

#[tokio::test]
async fn peer_controlled_text_is_stored_verbatim() {
    let h = Harness::new().await;
    let hostile = "x'); DROP TABLE messages; --";

    let mut env = envelope(EnvelopeType::Text, &charmlink_protocol::payload::escape_text(hostile));
    env.username = "bob' OR '1'='1".into();
    h.engine.dispatcher().dispatch(BOB, env).await.unwrap();

    let rows = h.engine.get_messages(BOB).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].payload, hostile);
    assert_eq!(rows[0].username, "bob' OR '1'='1");
}

#[tokio::test]
async fn undecodable_and_foreign_envelopes_are_dropped() {
    let h = Harness::new().await;

    for raw in ["0xzz", "0x7b", "not even close"] {
        let outcome = h.engine.dispatcher().dispatch_raw(BOB, raw).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Dropped);
    }

    let mut group = envelope(EnvelopeType::Text, "for the group");
    group.application = "charmlink-group".into();
    let outcome = h
        .engine
        .dispatcher()
        .dispatch_raw(BOB, &to_wire(&group).unwrap())
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Dropped);

    assert!(h.engine.get_messages(BOB).await.unwrap().is_empty());
    assert!(h.transport.sent().await.is_empty());
}
