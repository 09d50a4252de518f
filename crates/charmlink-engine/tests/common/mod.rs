#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use charmlink_db::Database;
use charmlink_engine::memory::{MemoryLedger, MemoryTransport};
use charmlink_engine::{Engine, EngineConfig};
use charmlink_types::envelope::{Envelope, EnvelopeType};
use charmlink_types::events::ChatEvent;
use charmlink_types::models::{ContentType, MessageState, NewMessage};
use tokio::sync::broadcast;

pub const APP: &str = "charmlink-chat";
pub const BOB: &str = "bob-key";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("charmlink_engine=debug")
        .try_init();
}

pub struct Harness {
    pub engine: Engine,
    pub transport: MemoryTransport,
    pub ledger: MemoryLedger,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(config()).await
    }

    pub async fn with_config(config: EngineConfig) -> Self {
        init_tracing();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let transport = MemoryTransport::new();
        let ledger = MemoryLedger::new();
        ledger.add_contact(BOB, "Bob", "addr-bob").await;

        let engine = Engine::new(config, db, Arc::new(transport.clone()), Arc::new(ledger.clone()));
        Self {
            engine,
            transport,
            ledger,
        }
    }

    /// Insert a row directly, bypassing the send flows.
    pub async fn seed(&self, counterparty: &str, own: bool, state: MessageState) -> i64 {
        self.engine
            .store()
            .append(NewMessage {
                room: format!("dm-{}", counterparty),
                counterparty: counterparty.to_string(),
                username: if own { "alice".into() } else { "bob".into() },
                own,
                content_type: ContentType::Text,
                payload: "seeded".into(),
                filedata: None,
                amount: 0,
                correlation_id: None,
                timestamp: 1,
                state,
            })
            .await
            .unwrap()
    }

    pub async fn state_of(&self, id: i64) -> MessageState {
        self.engine.store().get(id).await.unwrap().unwrap().state
    }
}

pub fn config() -> EngineConfig {
    EngineConfig {
        application: APP.into(),
        username: "alice".into(),
        poll_interval: Duration::from_millis(20),
        presence_timeout: Duration::from_millis(100),
        ..Default::default()
    }
}

pub fn envelope(kind: EnvelopeType, message: &str) -> Envelope {
    Envelope::new(APP, kind, "bob", message.to_string())
}

/// Wait for the first event matching `pred`, or fail after a second.
pub async fn next_event<F>(rx: &mut broadcast::Receiver<ChatEvent>, pred: F) -> ChatEvent
where
    F: Fn(&ChatEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let event = rx.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
