use tracing::{debug, info, warn};

use charmlink_protocol::from_wire;
use charmlink_protocol::payload::{parse_amount, parse_int, unescape_text};
use charmlink_types::envelope::{Envelope, EnvelopeType};
use charmlink_types::events::ChatEvent;
use charmlink_types::models::{ContentType, Message, MessageState, NewMessage};
use charmlink_types::now_ms;

use crate::bus::EventBus;
use crate::error::Result;
use crate::outbound::{Courier, room_for};
use crate::presence::ContactPresence;
use crate::store::MessageStore;

/// What dispatching one envelope did.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// A receipt moved this many own rows.
    ReceiptApplied(usize),
    /// A ping was answered; `false` if the pong could not be sent.
    PongSent(bool),
    PresenceRecorded,
    Stored(Message),
    /// Undecodable, foreign channel or unknown type. Nothing was written.
    Dropped,
}

/// Routes inbound envelopes for one application channel. Both host
/// adapters call into this; neither routes on its own.
#[derive(Clone)]
pub struct InboundDispatcher {
    store: MessageStore,
    presence: ContactPresence,
    courier: Courier,
    bus: EventBus,
}

impl InboundDispatcher {
    pub fn new(store: MessageStore, presence: ContactPresence, courier: Courier, bus: EventBus) -> Self {
        Self {
            store,
            presence,
            courier,
            bus,
        }
    }

    pub fn application(&self) -> &str {
        self.courier.application()
    }

    /// Decode a wire payload and dispatch it. Malformed payloads are logged
    /// and dropped; only store failures come back as errors.
    pub async fn dispatch_raw(&self, sender: &str, raw: &str) -> Result<DispatchOutcome> {
        match from_wire(raw) {
            Ok(envelope) => self.dispatch(sender, envelope).await,
            Err(e) => {
                warn!(counterparty = %sender, "Dropping undecodable envelope: {}", e);
                Ok(DispatchOutcome::Dropped)
            }
        }
    }

    pub async fn dispatch(&self, sender: &str, envelope: Envelope) -> Result<DispatchOutcome> {
        if envelope.application != self.application() {
            debug!(
                counterparty = %sender,
                application = %envelope.application,
                "Ignoring envelope for another channel"
            );
            return Ok(DispatchOutcome::Dropped);
        }

        let Some(kind) = envelope.envelope_type() else {
            warn!(counterparty = %sender, envelope_type = %envelope.kind, "Unknown envelope type");
            return Ok(DispatchOutcome::Dropped);
        };

        debug!(counterparty = %sender, envelope_type = ?kind, "Dispatching envelope");

        match kind {
            EnvelopeType::Read => {
                self.apply_receipt(sender, &[MessageState::Sent, MessageState::Delivered], MessageState::Read)
                    .await
            }
            EnvelopeType::DeliveryReceipt => {
                self.apply_receipt(sender, &[MessageState::Sent], MessageState::Delivered)
                    .await
            }
            EnvelopeType::Ping => {
                let pong = self.courier.envelope(EnvelopeType::Pong, String::new());
                Ok(DispatchOutcome::PongSent(
                    self.courier.send_best_effort(&pong, sender).await,
                ))
            }
            EnvelopeType::Pong => {
                self.presence.record_pong(sender).await;
                Ok(DispatchOutcome::PresenceRecorded)
            }
            EnvelopeType::Text => self.store_inbound(sender, ContentType::Text, envelope).await,
            EnvelopeType::Charm => self.store_inbound(sender, ContentType::Charm, envelope).await,
            EnvelopeType::Token => self.store_inbound(sender, ContentType::Token, envelope).await,
        }
    }

    /// Receipts carry no message id: they acknowledge every own row for the
    /// sender that is currently in `from`.
    async fn apply_receipt(
        &self,
        sender: &str,
        from: &[MessageState],
        to: MessageState,
    ) -> Result<DispatchOutcome> {
        let updated = self.store.transition(sender, true, from, to).await?;
        if updated > 0 {
            debug!(counterparty = %sender, updated, "Receipt moved messages to {}", to);
            self.bus.publish(ChatEvent::MessagesUpdated {
                counterparty: sender.to_string(),
            });
        }
        Ok(DispatchOutcome::ReceiptApplied(updated))
    }

    async fn store_inbound(
        &self,
        sender: &str,
        content_type: ContentType,
        envelope: Envelope,
    ) -> Result<DispatchOutcome> {
        let payload = match content_type {
            ContentType::Text => unescape_text(&envelope.message),
            _ => envelope.message,
        };
        let amount = if content_type.carries_amount() {
            parse_amount(envelope.amount.as_ref())
        } else {
            0
        };
        let timestamp = envelope.timestamp.as_ref().and_then(parse_int).unwrap_or_else(now_ms);

        let new = NewMessage {
            room: room_for(sender),
            counterparty: sender.to_string(),
            username: envelope.username,
            own: false,
            content_type,
            payload,
            filedata: envelope.filedata,
            amount,
            correlation_id: None,
            timestamp,
            state: MessageState::Sent,
        };

        let id = self.store.append(new.clone()).await?;
        let message = new.into_message(id);
        info!(counterparty = %sender, id, "Inbound {} stored", content_type.as_str());
        self.bus.publish(ChatEvent::NewMessage(message.clone()));

        let receipt = self.courier.envelope(EnvelopeType::DeliveryReceipt, String::new());
        self.courier.send_best_effort(&receipt, sender).await;

        Ok(DispatchOutcome::Stored(message))
    }
}
