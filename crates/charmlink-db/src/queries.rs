use charmlink_types::models::{
    ConversationMeta, Message, MessageState, NewMessage, NotifyState, TransactionEntry,
    TransferKind, TransferMetadata, TxStatus,
};
use rusqlite::Connection;
use rusqlite::types::ToSql;

use crate::models::{ConversationMetaRow, MessageRow, TransactionRow};
use crate::{Database, Result, StoreError};

const MESSAGE_COLUMNS: &str = "id, room, counterparty, username, own, type, message, filedata, custom_id, state, read_flag, amount, date";

const TRANSACTION_COLUMNS: &str = "id, ledger_op_id, approval_queue_id, type, counterparty, correlation_id, metadata_json, status, notify_state, created_at";

/// Notification states a sender may pick up: `due`, or a `sending` claim
/// older than `?1`.
const CLAIMABLE: &str = "(notify_state = 'due' OR (notify_state = 'sending' AND (claimed_at IS NULL OR claimed_at < ?1)))";

/// A deferred transfer about to be tracked.
pub struct PendingTransfer<'a> {
    pub correlation_id: i64,
    pub kind: TransferKind,
    pub counterparty: &'a str,
    pub metadata: &'a TransferMetadata,
    pub ledger_op_id: Option<&'a str>,
    pub approval_queue_id: Option<&'a str>,
    pub created_at: i64,
}

impl Database {
    // -- Messages --

    /// Append a row and return its id. Ids are strictly increasing.
    pub fn insert_message(&self, msg: &NewMessage) -> Result<i64> {
        self.with_conn(|conn| insert_message_row(conn, msg))
    }

    pub fn get_message(&self, id: i64) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
            let row = conn.query_row(&sql, [id], read_message_row).optional()?;
            row.map(Message::try_from).transpose()
        })
    }

    /// Every row for a counterparty in insertion order.
    pub fn get_messages(&self, counterparty: &str) -> Result<Vec<Message>> {
        self.get_messages_after(counterparty, 0, u32::MAX)
    }

    /// Rows with `id > after_id`, ascending. Callers page by passing the
    /// last id they saw.
    pub fn get_messages_after(&self, counterparty: &str, after_id: i64, limit: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| query_messages(conn, counterparty, after_id, limit))
    }

    /// Guarded bulk update: every row for `(counterparty, own)` whose state
    /// is in `from` moves to `to`. Returns the number of rows changed.
    pub fn transition_messages(
        &self,
        counterparty: &str,
        own: bool,
        from: &[MessageState],
        to: MessageState,
    ) -> Result<usize> {
        if from.is_empty() {
            return Ok(0);
        }

        self.with_conn(|conn| {
            let states: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
            let placeholders: Vec<String> = (4..4 + states.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "UPDATE messages SET state = ?1 WHERE counterparty = ?2 AND own = ?3 AND state IN ({})",
                placeholders.join(", ")
            );

            let to_str = to.as_str();
            let mut params: Vec<&dyn ToSql> = vec![&to_str, &counterparty, &own];
            params.extend(states.iter().map(|s| s as &dyn ToSql));

            Ok(conn.execute(&sql, params.as_slice())?)
        })
    }

    /// Guarded update of the single outgoing row linked to a transfer.
    pub fn transition_by_correlation(
        &self,
        correlation_id: i64,
        from: &[MessageState],
        to: MessageState,
    ) -> Result<usize> {
        if from.is_empty() {
            return Ok(0);
        }

        self.with_conn(|conn| {
            let states: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
            let placeholders: Vec<String> = (3..3 + states.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "UPDATE messages SET state = ?1 WHERE custom_id = ?2 AND own = 1 AND state IN ({})",
                placeholders.join(", ")
            );

            let to_str = to.as_str();
            let mut params: Vec<&dyn ToSql> = vec![&to_str, &correlation_id];
            params.extend(states.iter().map(|s| s as &dyn ToSql));

            Ok(conn.execute(&sql, params.as_slice())?)
        })
    }

    /// Outgoing pending rows for `counterparty` that no tracker entry
    /// accounts for become `zombie`.
    pub fn zombify_orphaned_pending(&self, counterparty: &str) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE messages SET state = 'zombie'
                 WHERE counterparty = ?1 AND own = 1 AND state = 'pending'
                   AND (custom_id IS NULL
                        OR custom_id NOT IN (SELECT correlation_id FROM transactions))",
                [counterparty],
            )?)
        })
    }

    /// Flag inbound rows as seen. Does not touch `state`.
    pub fn mark_inbound_read(&self, counterparty: &str) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE messages SET read_flag = 1 WHERE counterparty = ?1 AND own = 0 AND read_flag = 0",
                [counterparty],
            )?)
        })
    }

    // -- Transactions --

    /// First write wins per correlation id. Returns the stored entry and
    /// whether this call created it. A repeat with different details is a
    /// conflict.
    pub fn record_pending_transaction(&self, t: &PendingTransfer<'_>) -> Result<(TransactionEntry, bool)> {
        let metadata_json = serde_json::to_string(t.metadata)?;
        self.with_conn(|conn| insert_pending_transaction(conn, t, &metadata_json))
    }

    /// Write a deferred transfer's tracker entry and its `pending` message in
    /// one transaction, so no reader ever sees the row without the entry.
    pub fn insert_deferred_transfer(
        &self,
        msg: &NewMessage,
        t: &PendingTransfer<'_>,
    ) -> Result<(i64, TransactionEntry)> {
        let metadata_json = serde_json::to_string(t.metadata)?;

        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let (entry, _created) = insert_pending_transaction(&tx, t, &metadata_json)?;
            let id = insert_message_row(&tx, msg)?;
            tx.commit()?;
            Ok((id, entry))
        })
    }

    pub fn get_transaction_by_correlation(&self, correlation_id: i64) -> Result<Option<TransactionEntry>> {
        self.with_conn(|conn| query_transaction(conn, "correlation_id = ?1", &correlation_id))
    }

    pub fn get_transaction_by_approval_queue_id(&self, id: &str) -> Result<Option<TransactionEntry>> {
        self.with_conn(|conn| query_transaction(conn, "approval_queue_id = ?1", &id))
    }

    /// Non-terminal entries, oldest first, optionally scoped to one peer.
    pub fn get_pending_transactions(&self, counterparty: Option<&str>) -> Result<Vec<TransactionEntry>> {
        self.with_conn(|conn| match counterparty {
            Some(peer) => query_transactions(conn, "status = 'pending' AND counterparty = ?1", &[&peer]),
            None => query_transactions(conn, "status = 'pending'", &[]),
        })
    }

    /// Confirmed entries whose notification has not gone out yet. A claim
    /// taken before `stale_before` is treated as abandoned and offered again.
    pub fn get_due_notifications(&self, stale_before: i64) -> Result<Vec<TransactionEntry>> {
        self.with_conn(|conn| {
            query_transactions(
                conn,
                &format!("status = 'confirmed' AND {}", CLAIMABLE),
                &[&stale_before],
            )
        })
    }

    /// Move a pending entry to a terminal status. Only the first call for an
    /// entry changes anything; confirmed entries become due for notification
    /// in the same statement.
    pub fn mark_transaction_terminal(&self, ledger_op_id: &str, status: TxStatus) -> Result<usize> {
        self.with_conn(|conn| update_terminal(conn, "ledger_op_id = ?2", &ledger_op_id, status))
    }

    pub fn mark_transaction_terminal_by_correlation(&self, correlation_id: i64, status: TxStatus) -> Result<usize> {
        self.with_conn(|conn| update_terminal(conn, "correlation_id = ?2", &correlation_id, status))
    }

    /// Claim a due notification for sending. False when another cycle or
    /// context holds a claim younger than `stale_before`.
    pub fn claim_notification(&self, id: i64, now: i64, stale_before: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let sql = format!(
                "UPDATE transactions SET notify_state = 'sending', claimed_at = ?2
                 WHERE id = ?3 AND status = 'confirmed' AND {}",
                CLAIMABLE
            );
            Ok(conn.execute(&sql, rusqlite::params![stale_before, now, id])? == 1)
        })
    }

    /// Release a claimed notification: `sent` on success, back to `due` so
    /// the next cycle retries otherwise.
    pub fn finish_notification(&self, id: i64, delivered: bool) -> Result<bool> {
        let to = if delivered { NotifyState::Sent } else { NotifyState::Due };
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE transactions SET notify_state = ?1, claimed_at = NULL
                 WHERE id = ?2 AND notify_state = 'sending'",
                rusqlite::params![to.as_str(), id],
            )?;
            Ok(changed == 1)
        })
    }

    // -- Conversation meta --

    pub fn mark_conversation_opened(&self, counterparty: &str, now: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversation_meta (counterparty, last_opened) VALUES (?1, ?2)
                 ON CONFLICT(counterparty) DO UPDATE SET last_opened = excluded.last_opened",
                rusqlite::params![counterparty, now],
            )?;
            Ok(())
        })
    }

    pub fn set_conversation_archived(&self, counterparty: &str, archived: bool, now: i64) -> Result<()> {
        let archived_date = archived.then_some(now);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversation_meta (counterparty, archived, archived_date) VALUES (?1, ?2, ?3)
                 ON CONFLICT(counterparty) DO UPDATE SET archived = excluded.archived, archived_date = excluded.archived_date",
                rusqlite::params![counterparty, archived, archived_date],
            )?;
            Ok(())
        })
    }

    pub fn get_conversation_meta(&self, counterparty: &str) -> Result<Option<ConversationMeta>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT counterparty, archived, archived_date, last_opened FROM conversation_meta WHERE counterparty = ?1",
                    [counterparty],
                    |row| {
                        Ok(ConversationMetaRow {
                            counterparty: row.get(0)?,
                            archived: row.get(1)?,
                            archived_date: row.get(2)?,
                            last_opened: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(row.map(ConversationMeta::from))
        })
    }
}

fn insert_message_row(conn: &Connection, msg: &NewMessage) -> Result<i64> {
    conn.execute(
        "INSERT INTO messages (room, counterparty, username, own, type, message, filedata, custom_id, state, amount, date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        rusqlite::params![
            msg.room,
            msg.counterparty,
            msg.username,
            msg.own,
            msg.content_type.as_str(),
            msg.payload,
            msg.filedata,
            msg.correlation_id,
            msg.state.as_str(),
            if msg.content_type.carries_amount() { msg.amount } else { 0 },
            msg.timestamp,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_pending_transaction(
    conn: &Connection,
    t: &PendingTransfer<'_>,
    metadata_json: &str,
) -> Result<(TransactionEntry, bool)> {
    let inserted = conn.execute(
        "INSERT INTO transactions (ledger_op_id, approval_queue_id, type, counterparty, correlation_id, metadata_json, status, notify_state, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', 'none', ?7)
         ON CONFLICT(correlation_id) DO NOTHING",
        rusqlite::params![
            t.ledger_op_id,
            t.approval_queue_id,
            t.kind.as_str(),
            t.counterparty,
            t.correlation_id,
            metadata_json,
            t.created_at,
        ],
    )? == 1;

    let entry = query_transaction(conn, "correlation_id = ?1", &t.correlation_id)?
        .ok_or_else(|| StoreError::Corrupt(format!("transaction {} vanished", t.correlation_id)))?;

    if !inserted
        && (entry.kind != t.kind || entry.counterparty != t.counterparty || &entry.metadata != t.metadata)
    {
        return Err(StoreError::Conflict(t.correlation_id));
    }

    Ok((entry, inserted))
}

fn read_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        room: row.get(1)?,
        counterparty: row.get(2)?,
        username: row.get(3)?,
        own: row.get(4)?,
        kind: row.get(5)?,
        message: row.get(6)?,
        filedata: row.get(7)?,
        custom_id: row.get(8)?,
        state: row.get(9)?,
        read_flag: row.get(10)?,
        amount: row.get(11)?,
        date: row.get(12)?,
    })
}

fn read_transaction_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TransactionRow> {
    Ok(TransactionRow {
        id: row.get(0)?,
        ledger_op_id: row.get(1)?,
        approval_queue_id: row.get(2)?,
        kind: row.get(3)?,
        counterparty: row.get(4)?,
        correlation_id: row.get(5)?,
        metadata_json: row.get(6)?,
        status: row.get(7)?,
        notify_state: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn query_messages(conn: &Connection, counterparty: &str, after_id: i64, limit: u32) -> Result<Vec<Message>> {
    let sql = format!(
        "SELECT {} FROM messages WHERE counterparty = ?1 AND id > ?2 ORDER BY id ASC LIMIT ?3",
        MESSAGE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map(rusqlite::params![counterparty, after_id, limit], read_message_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(Message::try_from).collect()
}

fn query_transaction(conn: &Connection, filter: &str, value: &dyn ToSql) -> Result<Option<TransactionEntry>> {
    let sql = format!("SELECT {} FROM transactions WHERE {}", TRANSACTION_COLUMNS, filter);
    let row = conn.query_row(&sql, [value], read_transaction_row).optional()?;
    row.map(TransactionEntry::try_from).transpose()
}

fn query_transactions(conn: &Connection, filter: &str, params: &[&dyn ToSql]) -> Result<Vec<TransactionEntry>> {
    let sql = format!("SELECT {} FROM transactions WHERE {} ORDER BY id ASC", TRANSACTION_COLUMNS, filter);
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map(params, read_transaction_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(TransactionEntry::try_from).collect()
}

fn update_terminal(conn: &Connection, filter: &str, key: &dyn ToSql, status: TxStatus) -> Result<usize> {
    // pending -> pending is not a transition
    if status == TxStatus::Pending {
        return Ok(0);
    }

    let notify = match status {
        TxStatus::Confirmed => NotifyState::Due,
        _ => NotifyState::None,
    };
    let sql = format!(
        "UPDATE transactions SET status = ?1, notify_state = ?3 WHERE {} AND status = 'pending'",
        filter
    );
    let status_str = status.as_str();
    let notify_str = notify.as_str();
    Ok(conn.execute(&sql, rusqlite::params![status_str, key, notify_str])?)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
