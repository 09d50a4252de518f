//! Database row types. These map directly to SQLite rows.
//! Enum columns stay as text here and are validated on conversion.

use charmlink_types::models::{
    ContentType, ConversationMeta, Message, MessageState, NotifyState, TransactionEntry,
    TransferKind, TxStatus,
};

use crate::{Result, StoreError};

pub struct MessageRow {
    pub id: i64,
    pub room: String,
    pub counterparty: String,
    pub username: String,
    pub own: bool,
    pub kind: String,
    pub message: String,
    pub filedata: Option<String>,
    pub custom_id: Option<i64>,
    pub state: String,
    pub read_flag: bool,
    pub amount: i64,
    pub date: i64,
}

pub struct TransactionRow {
    pub id: i64,
    pub ledger_op_id: Option<String>,
    pub approval_queue_id: Option<String>,
    pub kind: String,
    pub counterparty: String,
    pub correlation_id: i64,
    pub metadata_json: String,
    pub status: String,
    pub notify_state: String,
    pub created_at: i64,
}

pub struct ConversationMetaRow {
    pub counterparty: String,
    pub archived: bool,
    pub archived_date: Option<i64>,
    pub last_opened: Option<i64>,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self> {
        let content_type = ContentType::parse(&row.kind)
            .ok_or_else(|| StoreError::Corrupt(format!("message {} type '{}'", row.id, row.kind)))?;
        let state = MessageState::parse(&row.state)
            .ok_or_else(|| StoreError::Corrupt(format!("message {} state '{}'", row.id, row.state)))?;

        Ok(Message {
            id: row.id,
            room: row.room,
            counterparty: row.counterparty,
            username: row.username,
            own: row.own,
            content_type,
            payload: row.message,
            filedata: row.filedata,
            amount: if content_type.carries_amount() { row.amount } else { 0 },
            correlation_id: row.custom_id,
            timestamp: row.date,
            state,
            read_flag: row.read_flag,
        })
    }
}

impl TryFrom<TransactionRow> for TransactionEntry {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self> {
        let kind = TransferKind::parse(&row.kind).ok_or_else(|| {
            StoreError::Corrupt(format!("transaction {} type '{}'", row.id, row.kind))
        })?;
        let status = TxStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!("transaction {} status '{}'", row.id, row.status))
        })?;
        let notify_state = NotifyState::parse(&row.notify_state).ok_or_else(|| {
            StoreError::Corrupt(format!("transaction {} notify_state '{}'", row.id, row.notify_state))
        })?;

        Ok(TransactionEntry {
            id: row.id,
            correlation_id: row.correlation_id,
            ledger_op_id: row.ledger_op_id,
            approval_queue_id: row.approval_queue_id,
            kind,
            counterparty: row.counterparty,
            metadata: serde_json::from_str(&row.metadata_json)?,
            status,
            notify_state,
            created_at: row.created_at,
        })
    }
}

impl From<ConversationMetaRow> for ConversationMeta {
    fn from(row: ConversationMetaRow) -> Self {
        Self {
            counterparty: row.counterparty,
            archived: row.archived,
            archived_date: row.archived_date,
            last_opened: row.last_opened,
        }
    }
}
