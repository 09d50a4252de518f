mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;

use charmlink_engine::dispatcher::DispatchOutcome;
use charmlink_engine::hosts::{BackgroundWorker, ForegroundEvent, ForegroundSession, TransportEvent};
use charmlink_protocol::to_wire;
use charmlink_types::envelope::EnvelopeType;
use charmlink_types::events::ChatEvent;
use charmlink_types::models::MessageState;

use common::{APP, BOB, Harness, envelope, next_event};

#[tokio::test]
async fn background_worker_processes_events_in_order() {
    let h = Harness::new().await;
    let mut events = h.engine.events();
    let (tx, worker) = BackgroundWorker::spawn(h.engine.clone(), 16);

    for text in ["one", "two"] {
        tx.send(TransportEvent {
            sender: BOB.into(),
            channel: APP.into(),
            payload: to_wire(&envelope(EnvelopeType::Text, text)).unwrap(),
        })
        .await
        .unwrap();
    }
    tx.send(TransportEvent {
        sender: BOB.into(),
        channel: "charmlink-group".into(),
        payload: to_wire(&envelope(EnvelopeType::Text, "elsewhere")).unwrap(),
    })
    .await
    .unwrap();
    tx.send(TransportEvent {
        sender: BOB.into(),
        channel: APP.into(),
        payload: "0xnothex".into(),
    })
    .await
    .unwrap();

    drop(tx);
    tokio::time::timeout(Duration::from_secs(2), worker).await.unwrap().unwrap();

    let first = next_event(&mut events, |e| matches!(e, ChatEvent::NewMessage(_))).await;
    let ChatEvent::NewMessage(first) = first else { unreachable!() };
    assert_eq!(first.payload, "one");

    let rows = h.engine.get_messages(BOB).await.unwrap();
    let payloads: Vec<&str> = rows.iter().map(|m| m.payload.as_str()).collect();
    assert_eq!(payloads, ["one", "two"]);
    assert_eq!(h.transport.sent_of_kind("delivery_receipt").await.len(), 2);
}

#[tokio::test]
async fn foreground_accepts_wire_strings_and_objects() {
    let h = Harness::new().await;
    let session = ForegroundSession::start(h.engine.clone());

    let wire = to_wire(&envelope(EnvelopeType::Text, "from%20wire")).unwrap();
    let outcome = session
        .handle_event(ForegroundEvent {
            remote_public_key: BOB.into(),
            data: json!(wire),
        })
        .await
        .unwrap();
    assert!(matches!(outcome, DispatchOutcome::Stored(ref m) if m.payload == "from wire"));

    let outcome = session
        .handle_event(ForegroundEvent {
            remote_public_key: BOB.into(),
            data: json!({
                "application": APP,
                "type": "charm",
                "username": "bob",
                "message": "sparkle",
                "amount": "12",
            }),
        })
        .await
        .unwrap();
    assert!(matches!(outcome, DispatchOutcome::Stored(ref m) if m.amount == 12));

    let outcome = session
        .handle_event(ForegroundEvent {
            remote_public_key: BOB.into(),
            data: json!(42),
        })
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Dropped);

    session.teardown().await;
}

#[tokio::test]
async fn both_hosts_share_one_store() {
    let h = Harness::new().await;
    let session = ForegroundSession::start(h.engine.clone());
    let (tx, worker) = BackgroundWorker::spawn(h.engine.clone(), 4);
    let own = h.seed(BOB, true, MessageState::Sent).await;

    tx.send(TransportEvent {
        sender: BOB.into(),
        channel: APP.into(),
        payload: to_wire(&envelope(EnvelopeType::DeliveryReceipt, "")).unwrap(),
    })
    .await
    .unwrap();
    drop(tx);
    worker.await.unwrap();

    session
        .handle_event(ForegroundEvent {
            remote_public_key: BOB.into(),
            data: json!(to_wire(&envelope(EnvelopeType::Read, "")).unwrap()),
        })
        .await
        .unwrap();

    assert_eq!(h.state_of(own).await, MessageState::Read);
    session.teardown().await;
}

#[tokio::test]
async fn silent_peer_is_reported_not_detected() {
    let h = Harness::new().await;
    let mut events = h.engine.events();
    let session = ForegroundSession::start(h.engine.clone());

    session.open_conversation(BOB).await.unwrap();

    let event = next_event(&mut events, |e| matches!(e, ChatEvent::PresenceChanged { .. })).await;
    assert!(matches!(event, ChatEvent::PresenceChanged { installed: false, .. }));
    session.teardown().await;
}

#[tokio::test]
async fn pong_within_the_window_counts() {
    let h = Harness::new().await;
    let session = ForegroundSession::start(h.engine.clone());

    let answer = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.engine
            .dispatcher()
            .dispatch(BOB, envelope(EnvelopeType::Pong, ""))
            .await
            .unwrap();
    };
    let (installed, ()) = tokio::join!(session.check_presence(BOB), answer);

    assert!(installed);
    assert_eq!(h.transport.sent_of_kind("ping").await.len(), 1);
    assert!(h.engine.presence().get(BOB).await.unwrap().last_ping.is_some());
    session.teardown().await;
}

#[tokio::test]
async fn teardown_cancels_presence_timers() {
    let mut config = common::config();
    config.presence_timeout = Duration::from_millis(200);
    let h = Harness::with_config(config).await;
    let session = ForegroundSession::start(h.engine.clone());
    let mut events = h.engine.events();

    session.open_conversation(BOB).await.unwrap();
    session.teardown().await;

    let presence = tokio::time::timeout(Duration::from_millis(400), async {
        loop {
            if let Ok(ChatEvent::PresenceChanged { .. }) = events.recv().await {
                return;
            }
        }
    })
    .await;
    assert!(presence.is_err(), "timer fired after teardown");
}

#[tokio::test]
async fn open_marks_inbound_rows_seen() {
    let h = Harness::new().await;
    let inbound = h.seed(BOB, false, MessageState::Sent).await;

    h.engine.mark_conversation_opened(BOB).await.unwrap();

    let row = h.engine.store().get(inbound).await.unwrap().unwrap();
    assert!(row.read_flag);
    assert_eq!(row.state, MessageState::Sent);
    let meta = h.engine.conversation_meta(BOB).await.unwrap().unwrap();
    assert!(meta.last_opened.is_some());
    assert!(!meta.archived);

    h.engine.set_archived(BOB, true).await.unwrap();
    let meta = h.engine.conversation_meta(BOB).await.unwrap().unwrap();
    assert!(meta.archived);
    assert!(meta.archived_date.is_some());
}

#[tokio::test]
async fn new_message_callbacks_stop_when_dropped() {
    let h = Harness::new().await;
    let seen = Arc::new(AtomicUsize::new(0));

    let counter = seen.clone();
    let subscription = h.engine.on_new_message(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    h.engine.send_message(BOB, "hi bob").await.unwrap();
    h.engine
        .dispatcher()
        .dispatch(BOB, envelope(EnvelopeType::Text, "hi alice"))
        .await
        .unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 2);

    drop(subscription);
    h.engine.send_message(BOB, "anyone?").await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn outgoing_text_survives_transport_failure() {
    let h = Harness::new().await;
    h.transport.set_failing(true);

    let message = h.engine.send_message(BOB, "hello & goodbye").await.unwrap();
    assert_eq!(message.state, MessageState::Sent);
    assert_eq!(message.payload, "hello & goodbye");
    assert!(h.transport.sent().await.is_empty());

    h.transport.set_failing(false);
    h.engine.send_message(BOB, "hello & goodbye").await.unwrap();
    let texts = h.transport.sent_of_kind("text").await;
    assert_eq!(texts.len(), 1);
    assert_eq!(texts[0].envelope.message, "hello%20%26%20goodbye");
}
