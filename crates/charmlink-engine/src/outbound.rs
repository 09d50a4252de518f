use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use tracing::{debug, info, warn};

use charmlink_protocol::payload::escape_text;
use charmlink_protocol::to_wire;
use charmlink_types::envelope::{Envelope, EnvelopeType};
use charmlink_types::events::ChatEvent;
use charmlink_types::models::{
    Contact, ContentType, Message, MessageState, NewMessage, TransferKind, TransferMetadata,
};
use charmlink_types::now_ms;

use crate::bus::EventBus;
use crate::collaborators::{Ledger, Transport};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::store::MessageStore;
use crate::tracker::TransactionTracker;

/// Conversation label for a 1:1 chat with `counterparty`.
pub fn room_for(counterparty: &str) -> String {
    format!("dm-{}", counterparty)
}

/// Builds envelopes stamped with our application and username and hands
/// them to the transport.
#[derive(Clone)]
pub struct Courier {
    transport: Arc<dyn Transport>,
    application: String,
    username: String,
}

impl Courier {
    pub fn new(transport: Arc<dyn Transport>, config: &EngineConfig) -> Self {
        Self {
            transport,
            application: config.application.clone(),
            username: config.username.clone(),
        }
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn envelope(&self, kind: EnvelopeType, message: String) -> Envelope {
        Envelope::new(&self.application, kind, &self.username, message)
    }

    /// The content envelope for a transfer. For deferred transfers this is
    /// the notification withheld until the ledger confirms.
    pub fn transfer_envelope(
        &self,
        kind: TransferKind,
        metadata: &TransferMetadata,
        correlation_id: i64,
    ) -> Result<Envelope> {
        let envelope = match kind {
            TransferKind::Charm => self.envelope(
                EnvelopeType::Charm,
                metadata.charm_id.clone().unwrap_or_default(),
            ),
            TransferKind::Token => self.envelope(EnvelopeType::Token, serde_json::to_string(metadata)?),
        };
        Ok(envelope.with_amount(metadata.amount).with_timestamp(correlation_id))
    }

    pub async fn send(&self, envelope: &Envelope, destination: &str) -> Result<()> {
        let wire = to_wire(envelope)?;
        self.transport.send(&wire, destination, &self.application).await?;
        debug!(counterparty = %destination, envelope_type = %envelope.kind, "Envelope sent");
        Ok(())
    }

    /// Fire-and-forget send: failures are logged, never retried.
    pub async fn send_best_effort(&self, envelope: &Envelope, destination: &str) -> bool {
        match self.send(envelope, destination).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    counterparty = %destination,
                    envelope_type = %envelope.kind,
                    "Envelope send failed: {}", e
                );
                false
            }
        }
    }
}

/// Compose flows: text messages, charms, token transfers and the read
/// receipt sent when a conversation is opened.
pub struct Outbound {
    store: MessageStore,
    tracker: TransactionTracker,
    courier: Courier,
    ledger: Arc<dyn Ledger>,
    bus: EventBus,
    last_correlation: AtomicI64,
}

impl Outbound {
    pub fn new(
        store: MessageStore,
        tracker: TransactionTracker,
        courier: Courier,
        ledger: Arc<dyn Ledger>,
        bus: EventBus,
    ) -> Self {
        Self {
            store,
            tracker,
            courier,
            ledger,
            bus,
            last_correlation: AtomicI64::new(0),
        }
    }

    /// Client timestamp used as a transfer's correlation id. Strictly
    /// increasing within this process even if the clock stalls.
    fn next_correlation_id(&self) -> i64 {
        let now = now_ms();
        let mut last = self.last_correlation.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self
                .last_correlation
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }

    async fn append(&self, new: NewMessage) -> Result<Message> {
        let id = self.store.append(new.clone()).await?;
        let message = new.into_message(id);
        self.bus.publish(ChatEvent::NewMessage(message.clone()));
        Ok(message)
    }

    pub async fn send_message(&self, counterparty: &str, text: &str) -> Result<Message> {
        let timestamp = now_ms();
        let message = self
            .append(NewMessage {
                room: room_for(counterparty),
                counterparty: counterparty.to_string(),
                username: self.courier.username().to_string(),
                own: true,
                content_type: ContentType::Text,
                payload: text.to_string(),
                filedata: None,
                amount: 0,
                correlation_id: None,
                timestamp,
                state: MessageState::Sent,
            })
            .await?;

        let envelope = self
            .courier
            .envelope(EnvelopeType::Text, escape_text(text))
            .with_timestamp(timestamp);
        self.courier.send_best_effort(&envelope, counterparty).await;

        Ok(message)
    }

    pub async fn send_charm(&self, counterparty: &str, charm_id: &str, amount: i64) -> Result<Message> {
        self.send_transfer(counterparty, TransferKind::Charm, amount, |contact| TransferMetadata {
            amount,
            display_name: contact.display_name.clone(),
            charm_id: Some(charm_id.to_string()),
            token: None,
        })
        .await
    }

    pub async fn send_token(&self, counterparty: &str, token: &str, amount: i64) -> Result<Message> {
        self.send_transfer(counterparty, TransferKind::Token, amount, |contact| TransferMetadata {
            amount,
            display_name: contact.display_name.clone(),
            charm_id: None,
            token: Some(token.to_string()),
        })
        .await
    }

    /// Submit a transfer and record its message. A deferred transfer starts
    /// `pending`, is written together with its tracker entry, and its envelope
    /// is held back for the reconciliation poller. Anything else is `sent` and
    /// announced right away.
    async fn send_transfer(
        &self,
        counterparty: &str,
        kind: TransferKind,
        amount: i64,
        build_metadata: impl FnOnce(&Contact) -> TransferMetadata,
    ) -> Result<Message> {
        let contact = self.resolve_contact(counterparty).await?;
        let address = contact
            .addresses
            .first()
            .cloned()
            .ok_or_else(|| EngineError::UnknownContact(counterparty.to_string()))?;
        let metadata = build_metadata(&contact);
        let correlation_id = self.next_correlation_id();

        let submission = self.ledger.submit_transfer(kind, &address, amount, &metadata).await?;

        let payload = match kind {
            TransferKind::Charm => metadata.charm_id.clone().unwrap_or_default(),
            TransferKind::Token => serde_json::to_string(&metadata)?,
        };
        let new = NewMessage {
            room: room_for(counterparty),
            counterparty: counterparty.to_string(),
            username: self.courier.username().to_string(),
            own: true,
            content_type: kind.content_type(),
            payload,
            filedata: None,
            amount,
            correlation_id: Some(correlation_id),
            timestamp: correlation_id,
            state: MessageState::Sent,
        };

        if !submission.deferred {
            let message = self.append(new).await?;
            let envelope = self.courier.transfer_envelope(kind, &metadata, correlation_id)?;
            self.courier.send_best_effort(&envelope, counterparty).await;
            return Ok(message);
        }

        let new = NewMessage {
            state: MessageState::Pending,
            ..new
        };
        let (id, _entry) = self
            .tracker
            .record_deferred(
                new.clone(),
                correlation_id,
                kind,
                metadata,
                submission.ledger_op_id,
                submission.approval_queue_id,
            )
            .await?;
        info!(
            counterparty = %counterparty,
            correlation_id,
            "{} transfer deferred for approval", kind.as_str()
        );

        let message = new.into_message(id);
        self.bus.publish(ChatEvent::NewMessage(message.clone()));
        Ok(message)
    }

    /// Tell the peer we have seen everything they sent.
    pub async fn send_read(&self, counterparty: &str) -> bool {
        let envelope = self.courier.envelope(EnvelopeType::Read, String::new());
        self.courier.send_best_effort(&envelope, counterparty).await
    }

    pub async fn send_ping(&self, counterparty: &str) -> bool {
        let envelope = self.courier.envelope(EnvelopeType::Ping, String::new());
        self.courier.send_best_effort(&envelope, counterparty).await
    }

    async fn resolve_contact(&self, counterparty: &str) -> Result<Contact> {
        self.ledger
            .get_contacts()
            .await?
            .into_iter()
            .find(|c| c.public_key == counterparty)
            .ok_or_else(|| EngineError::UnknownContact(counterparty.to_string()))
    }
}
