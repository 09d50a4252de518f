use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery state of a message row.
///
/// `read` and `failed` are terminal. `zombie` marks an orphaned pending
/// transfer and is terminal for display purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageState {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
    Zombie,
}

impl MessageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
            Self::Zombie => "zombie",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            "failed" => Some(Self::Failed),
            "zombie" => Some(Self::Zombie),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Read | Self::Failed | Self::Zombie)
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a message row carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Charm,
    Token,
    Ping,
    Pong,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Charm => "charm",
            Self::Token => "token",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "charm" => Some(Self::Charm),
            "token" => Some(Self::Token),
            "ping" => Some(Self::Ping),
            "pong" => Some(Self::Pong),
            _ => None,
        }
    }

    /// Only transfers carry a meaningful amount.
    pub fn carries_amount(&self) -> bool {
        matches!(self, Self::Charm | Self::Token)
    }
}

/// A persisted conversation row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub room: String,
    pub counterparty: String,
    /// Display name of the author.
    pub username: String,
    /// True for rows this side composed.
    pub own: bool,
    pub content_type: ContentType,
    /// URL-escaped text, a charm id, or serialized token metadata.
    pub payload: String,
    pub filedata: Option<String>,
    pub amount: i64,
    pub correlation_id: Option<i64>,
    pub timestamp: i64,
    pub state: MessageState,
    pub read_flag: bool,
}

/// Everything needed to append a row; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub room: String,
    pub counterparty: String,
    pub username: String,
    pub own: bool,
    pub content_type: ContentType,
    pub payload: String,
    pub filedata: Option<String>,
    pub amount: i64,
    pub correlation_id: Option<i64>,
    pub timestamp: i64,
    pub state: MessageState,
}

impl NewMessage {
    /// The row as it reads back once the store assigned `id`.
    pub fn into_message(self, id: i64) -> Message {
        let amount = if self.content_type.carries_amount() { self.amount } else { 0 };
        Message {
            id,
            room: self.room,
            counterparty: self.counterparty,
            username: self.username,
            own: self.own,
            content_type: self.content_type,
            payload: self.payload,
            filedata: self.filedata,
            amount,
            correlation_id: self.correlation_id,
            timestamp: self.timestamp,
            state: self.state,
            read_flag: false,
        }
    }
}

/// Ledger transfer flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Charm,
    Token,
}

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Charm => "charm",
            Self::Token => "token",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "charm" => Some(Self::Charm),
            "token" => Some(Self::Token),
            _ => None,
        }
    }

    pub fn content_type(&self) -> ContentType {
        match self {
            Self::Charm => ContentType::Charm,
            Self::Token => ContentType::Token,
        }
    }
}

/// Ledger-side status of a deferred transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Progress of the notification withheld while a transfer awaited approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyState {
    /// Nothing to send (still pending, or rejected).
    None,
    /// Confirmed; the envelope still has to go out.
    Due,
    /// Claimed by a reconciliation cycle.
    Sending,
    Sent,
}

impl NotifyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Due => "due",
            Self::Sending => "sending",
            Self::Sent => "sent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "due" => Some(Self::Due),
            "sending" => Some(Self::Sending),
            "sent" => Some(Self::Sent),
            _ => None,
        }
    }
}

/// Transfer details kept with a tracker entry and, for tokens, sent as the
/// message payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMetadata {
    pub amount: i64,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charm_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// A deferred ledger operation correlated to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEntry {
    pub id: i64,
    pub correlation_id: i64,
    pub ledger_op_id: Option<String>,
    pub approval_queue_id: Option<String>,
    pub kind: TransferKind,
    pub counterparty: String,
    pub metadata: TransferMetadata,
    pub status: TxStatus,
    pub notify_state: NotifyState,
    pub created_at: i64,
}

/// Per-conversation bookkeeping that never touches message states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMeta {
    pub counterparty: String,
    pub archived: bool,
    pub archived_date: Option<i64>,
    pub last_opened: Option<i64>,
}

/// A ledger contact, used to resolve a public key to a transfer address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub public_key: String,
    pub display_name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub addresses: Vec<String>,
}
