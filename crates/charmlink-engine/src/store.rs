use std::sync::Arc;

use charmlink_db::Database;
use charmlink_types::models::{ConversationMeta, Message, MessageState, NewMessage};

use crate::error::{EngineError, Result};

/// Run a blocking database call off the async runtime.
pub(crate) async fn run_blocking<F, T>(db: &Arc<Database>, f: F) -> Result<T>
where
    F: FnOnce(&Database) -> charmlink_db::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| EngineError::Join(e.to_string()))?
        .map_err(EngineError::from)
}

/// Durable per-counterparty message log.
///
/// Rows are never deleted. State only moves through guarded updates that
/// name the states they are allowed to leave.
#[derive(Clone)]
pub struct MessageStore {
    db: Arc<Database>,
}

impl MessageStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Persist a row; returns the id the store assigned.
    pub async fn append(&self, message: NewMessage) -> Result<i64> {
        run_blocking(&self.db, move |db| db.insert_message(&message)).await
    }

    /// All rows for a counterparty, ascending by id.
    pub async fn query(&self, counterparty: &str) -> Result<Vec<Message>> {
        let counterparty = counterparty.to_string();
        run_blocking(&self.db, move |db| db.get_messages(&counterparty)).await
    }

    /// One page of rows after `after_id`; pass the last id seen to resume.
    pub async fn query_after(&self, counterparty: &str, after_id: i64, limit: u32) -> Result<Vec<Message>> {
        let counterparty = counterparty.to_string();
        run_blocking(&self.db, move |db| db.get_messages_after(&counterparty, after_id, limit)).await
    }

    pub async fn get(&self, id: i64) -> Result<Option<Message>> {
        run_blocking(&self.db, move |db| db.get_message(id)).await
    }

    /// Move every `(counterparty, own)` row whose state is in `from` to
    /// `to`. Rows in any other state are untouched.
    pub async fn transition(
        &self,
        counterparty: &str,
        own: bool,
        from: &[MessageState],
        to: MessageState,
    ) -> Result<usize> {
        let counterparty = counterparty.to_string();
        let from = from.to_vec();
        run_blocking(&self.db, move |db| db.transition_messages(&counterparty, own, &from, to)).await
    }

    /// Guarded update of the outgoing row linked to a transfer.
    pub async fn transition_by_correlation(
        &self,
        correlation_id: i64,
        from: &[MessageState],
        to: MessageState,
    ) -> Result<usize> {
        let from = from.to_vec();
        run_blocking(&self.db, move |db| db.transition_by_correlation(correlation_id, &from, to)).await
    }

    pub async fn zombify_orphaned_pending(&self, counterparty: &str) -> Result<usize> {
        let counterparty = counterparty.to_string();
        run_blocking(&self.db, move |db| db.zombify_orphaned_pending(&counterparty)).await
    }

    pub async fn mark_inbound_read(&self, counterparty: &str) -> Result<usize> {
        let counterparty = counterparty.to_string();
        run_blocking(&self.db, move |db| db.mark_inbound_read(&counterparty)).await
    }

    pub async fn mark_opened(&self, counterparty: &str, now: i64) -> Result<()> {
        let counterparty = counterparty.to_string();
        run_blocking(&self.db, move |db| db.mark_conversation_opened(&counterparty, now)).await
    }

    pub async fn set_archived(&self, counterparty: &str, archived: bool, now: i64) -> Result<()> {
        let counterparty = counterparty.to_string();
        run_blocking(&self.db, move |db| db.set_conversation_archived(&counterparty, archived, now)).await
    }

    pub async fn conversation_meta(&self, counterparty: &str) -> Result<Option<ConversationMeta>> {
        let counterparty = counterparty.to_string();
        run_blocking(&self.db, move |db| db.get_conversation_meta(&counterparty)).await
    }

    /// Cheap liveness probe used by the background worker while it waits
    /// for the database to come back.
    pub async fn probe(&self) -> Result<()> {
        run_blocking(&self.db, |db| db.ping()).await
    }
}
