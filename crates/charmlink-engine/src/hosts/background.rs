use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::Engine;
use crate::error::Result;

/// Raw event as the transport's background hook delivers it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportEvent {
    pub sender: String,
    pub channel: String,
    /// `0x`-prefixed hex envelope.
    pub payload: String,
}

const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Process-lifetime consumer of transport events. Events are handled one
/// at a time in arrival order.
pub struct BackgroundWorker {
    engine: Engine,
    rx: mpsc::Receiver<TransportEvent>,
}

impl BackgroundWorker {
    pub fn new(engine: Engine, rx: mpsc::Receiver<TransportEvent>) -> Self {
        Self { engine, rx }
    }

    /// Build a worker, spawn it, and return the sender feeding it.
    pub fn spawn(engine: Engine, capacity: usize) -> (mpsc::Sender<TransportEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let worker = Self::new(engine, rx);
        (tx, tokio::spawn(worker.run()))
    }

    /// Runs until every sender is dropped.
    pub async fn run(mut self) {
        info!(application = %self.engine.config().application, "Background worker started");

        while let Some(event) = self.rx.recv().await {
            if event.channel != self.engine.config().application {
                debug!(counterparty = %event.sender, channel = %event.channel, "Ignoring event for another channel");
                continue;
            }

            match self.handle(&event).await {
                Ok(()) => {}
                Err(e) if e.is_store_unavailable() => {
                    error!("Store unavailable, halting event processing: {}", e);
                    self.wait_for_store().await;
                    if let Err(e) = self.handle(&event).await {
                        error!(counterparty = %event.sender, "Dropping event after store recovery: {}", e);
                    }
                }
                Err(e) => warn!(counterparty = %event.sender, "Event handling failed: {}", e),
            }
        }

        info!("Background worker stopped");
    }

    async fn handle(&self, event: &TransportEvent) -> Result<()> {
        self.engine
            .dispatcher()
            .dispatch_raw(&event.sender, &event.payload)
            .await
            .map(|_| ())
    }

    async fn wait_for_store(&self) {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            tokio::time::sleep(backoff).await;
            match self.engine.store().probe().await {
                Ok(()) => {
                    info!("Store reachable again, resuming");
                    return;
                }
                Err(e) => {
                    debug!("Store still unavailable: {}", e);
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}
