use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use charmlink_types::envelope::Envelope;
use charmlink_types::events::ChatEvent;

use crate::dispatcher::DispatchOutcome;
use crate::engine::Engine;
use crate::error::Result;
use crate::poller::PollerHandle;

/// Event as the foreground application's transport callback delivers it.
/// `data` is either the wire string or an already parsed envelope object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForegroundEvent {
    pub remote_public_key: String,
    pub data: Value,
}

/// Lives as long as the application's view. Owns the poll loop and any
/// presence-check timers; all of them stop on [`teardown`](Self::teardown)
/// or drop.
pub struct ForegroundSession {
    id: Uuid,
    engine: Engine,
    poller: Mutex<Option<PollerHandle>>,
    timers: Mutex<JoinSet<()>>,
}

impl ForegroundSession {
    /// Start a session and its reconciliation loop.
    pub fn start(engine: Engine) -> Self {
        let poller = engine.start_polling();
        let id = Uuid::new_v4();
        info!(session = %id, "Foreground session started");

        Self {
            id,
            engine,
            poller: Mutex::new(Some(poller)),
            timers: Mutex::new(JoinSet::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub async fn handle_event(&self, event: ForegroundEvent) -> Result<DispatchOutcome> {
        let dispatcher = self.engine.dispatcher();
        match event.data {
            Value::String(raw) => dispatcher.dispatch_raw(&event.remote_public_key, &raw).await,
            data => match serde_json::from_value::<Envelope>(data) {
                Ok(envelope) => dispatcher.dispatch(&event.remote_public_key, envelope).await,
                Err(e) => {
                    warn!(counterparty = %event.remote_public_key, "Dropping malformed foreground event: {}", e);
                    Ok(DispatchOutcome::Dropped)
                }
            },
        }
    }

    /// Open a conversation and start a presence check. If no pong arrives
    /// within the presence timeout the peer is announced as not detected.
    pub async fn open_conversation(&self, counterparty: &str) -> Result<()> {
        let rx = self.engine.events();
        self.engine.mark_conversation_opened(counterparty).await?;

        if self.engine.presence().is_installed(counterparty).await == Some(true) {
            return Ok(());
        }

        let engine = self.engine.clone();
        let counterparty = counterparty.to_string();
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        while timers.try_join_next().is_some() {}
        timers.spawn(async move {
            if !wait_for_pong(&engine, &counterparty, rx).await {
                debug!(counterparty = %counterparty, "No pong, app not detected");
                engine.bus().publish(ChatEvent::PresenceChanged {
                    counterparty,
                    installed: false,
                });
            }
        });
        Ok(())
    }

    /// Ping and wait up to the presence timeout for an answer.
    pub async fn check_presence(&self, counterparty: &str) -> bool {
        if self.engine.presence().is_installed(counterparty).await == Some(true) {
            self.engine.ping(counterparty).await;
            return true;
        }
        let rx = self.engine.events();
        self.engine.ping(counterparty).await;
        wait_for_pong(&self.engine, counterparty, rx).await
    }

    /// Stop the poll loop and cancel pending presence checks.
    pub async fn teardown(&self) {
        let poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(poller) = poller {
            poller.stop().await;
        }
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .abort_all();
        info!(session = %self.id, "Foreground session torn down");
    }
}

async fn wait_for_pong(
    engine: &Engine,
    counterparty: &str,
    mut rx: tokio::sync::broadcast::Receiver<ChatEvent>,
) -> bool {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(ChatEvent::PresenceChanged {
                    counterparty: peer,
                    installed,
                }) if peer == counterparty => return installed,
                Ok(_) | Err(RecvError::Lagged(_)) => {
                    if engine.presence().is_installed(counterparty).await == Some(true) {
                        return true;
                    }
                }
                Err(RecvError::Closed) => return false,
            }
        }
    };

    tokio::time::timeout(engine.config().presence_timeout, wait)
        .await
        .unwrap_or(false)
}
