use serde::{Deserialize, Serialize};

use crate::models::{Message, TxStatus};

/// Events published on the engine's event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChatEvent {
    /// A row was appended, inbound or outbound
    NewMessage(Message),

    /// Receipt or reconciliation changed states in a conversation
    MessagesUpdated { counterparty: String },

    /// A handshake changed what we know about a peer
    PresenceChanged { counterparty: String, installed: bool },

    /// A deferred transfer reached a terminal status
    TransferResolved { correlation_id: i64, status: TxStatus },
}

impl ChatEvent {
    /// Returns the counterparty if this event is scoped to one conversation.
    pub fn counterparty(&self) -> Option<&str> {
        match self {
            Self::NewMessage(message) => Some(&message.counterparty),
            Self::MessagesUpdated { counterparty } => Some(counterparty),
            Self::PresenceChanged { counterparty, .. } => Some(counterparty),
            Self::TransferResolved { .. } => None,
        }
    }
}
