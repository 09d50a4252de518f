use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use charmlink_db::Database;
use charmlink_types::events::ChatEvent;
use charmlink_types::models::{ConversationMeta, Message};
use charmlink_types::now_ms;

use crate::bus::{EventBus, Subscription};
use crate::collaborators::{Ledger, Transport};
use crate::config::EngineConfig;
use crate::dispatcher::InboundDispatcher;
use crate::error::Result;
use crate::outbound::{Courier, Outbound};
use crate::poller::{PollerHandle, ReconciliationPoller};
use crate::presence::ContactPresence;
use crate::store::MessageStore;
use crate::tracker::TransactionTracker;

/// Handle to every component of one execution context. Cheap to clone;
/// clones share the same store, bus and presence cache.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    store: MessageStore,
    tracker: TransactionTracker,
    presence: ContactPresence,
    bus: EventBus,
    dispatcher: InboundDispatcher,
    outbound: Outbound,
    poller: Arc<ReconciliationPoller>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        db: Arc<Database>,
        transport: Arc<dyn Transport>,
        ledger: Arc<dyn Ledger>,
    ) -> Self {
        let bus = EventBus::new();
        let store = MessageStore::new(db.clone());
        let tracker = TransactionTracker::new(db);
        let presence = ContactPresence::new(bus.clone());
        let courier = Courier::new(transport, &config);

        let dispatcher = InboundDispatcher::new(store.clone(), presence.clone(), courier.clone(), bus.clone());
        let outbound = Outbound::new(
            store.clone(),
            tracker.clone(),
            courier.clone(),
            ledger.clone(),
            bus.clone(),
        );
        let poller = Arc::new(ReconciliationPoller::new(
            store.clone(),
            tracker.clone(),
            ledger,
            courier,
            bus.clone(),
            config.pending_timeout,
            config.notify_lease,
        ));

        info!(application = %config.application, "Engine ready");

        Self {
            inner: Arc::new(EngineInner {
                config,
                store,
                tracker,
                presence,
                bus,
                dispatcher,
                outbound,
                poller,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &MessageStore {
        &self.inner.store
    }

    pub fn tracker(&self) -> &TransactionTracker {
        &self.inner.tracker
    }

    pub fn presence(&self) -> &ContactPresence {
        &self.inner.presence
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn dispatcher(&self) -> &InboundDispatcher {
        &self.inner.dispatcher
    }

    pub fn poller(&self) -> &Arc<ReconciliationPoller> {
        &self.inner.poller
    }

    /// Call `callback` for every appended row, inbound or outbound.
    pub fn on_new_message<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(move |event| {
            if let ChatEvent::NewMessage(message) = event {
                callback(message);
            }
        })
    }

    pub fn events(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.bus.receiver()
    }

    pub async fn get_messages(&self, counterparty: &str) -> Result<Vec<Message>> {
        self.inner.store.query(counterparty).await
    }

    pub async fn send_message(&self, counterparty: &str, text: &str) -> Result<Message> {
        self.inner.outbound.send_message(counterparty, text).await
    }

    pub async fn send_charm(&self, counterparty: &str, charm_id: &str, amount: i64) -> Result<Message> {
        self.inner.outbound.send_charm(counterparty, charm_id, amount).await
    }

    pub async fn send_token(&self, counterparty: &str, token: &str, amount: i64) -> Result<Message> {
        self.inner.outbound.send_token(counterparty, token, amount).await
    }

    /// Ping `counterparty` and note when we did. The pong, if any, arrives
    /// through the dispatcher.
    pub async fn ping(&self, counterparty: &str) -> bool {
        self.inner.presence.record_ping(counterparty).await;
        self.inner.outbound.send_ping(counterparty).await
    }

    /// Everything that happens when the user looks at a conversation:
    /// stamp it, flag inbound rows seen, send a read receipt, ping for
    /// presence and reconcile stale transfers for this peer.
    pub async fn mark_conversation_opened(&self, counterparty: &str) -> Result<()> {
        self.inner.store.mark_opened(counterparty, now_ms()).await?;
        self.inner.store.mark_inbound_read(counterparty).await?;

        self.inner.outbound.send_read(counterparty).await;
        self.ping(counterparty).await;

        let report = self.inner.poller.cleanup_conversation(counterparty).await?;
        if report.zombified > 0 {
            warn!(counterparty = %counterparty, zombified = report.zombified, "Stale transfers cleaned up");
        }
        Ok(())
    }

    pub async fn set_archived(&self, counterparty: &str, archived: bool) -> Result<()> {
        self.inner.store.set_archived(counterparty, archived, now_ms()).await
    }

    pub async fn conversation_meta(&self, counterparty: &str) -> Result<Option<ConversationMeta>> {
        self.inner.store.conversation_meta(counterparty).await
    }

    /// Start the timer-driven reconciliation loop.
    pub fn start_polling(&self) -> PollerHandle {
        self.inner.poller.clone().spawn(self.inner.config.poll_interval)
    }
}
