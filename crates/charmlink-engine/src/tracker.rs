use std::sync::Arc;
use std::time::Duration;

use charmlink_db::Database;
use charmlink_db::queries::PendingTransfer;
use charmlink_types::models::{NewMessage, TransactionEntry, TransferKind, TransferMetadata, TxStatus};
use charmlink_types::now_ms;

use crate::error::Result;
use crate::store::run_blocking;

/// Durable record of ledger operations deferred into the approval queue.
///
/// Entries are never removed; a terminal entry stays as an audit trail.
#[derive(Clone)]
pub struct TransactionTracker {
    db: Arc<Database>,
}

impl TransactionTracker {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Track a deferred transfer. A second call for the same correlation id
    /// returns the existing entry; it fails only if the details differ.
    pub async fn record_pending(
        &self,
        correlation_id: i64,
        kind: TransferKind,
        counterparty: &str,
        metadata: TransferMetadata,
        ledger_op_id: Option<String>,
        approval_queue_id: Option<String>,
    ) -> Result<TransactionEntry> {
        let counterparty = counterparty.to_string();
        let created_at = now_ms();

        run_blocking(&self.db, move |db| {
            let (entry, _created) = db.record_pending_transaction(&PendingTransfer {
                correlation_id,
                kind,
                counterparty: &counterparty,
                metadata: &metadata,
                ledger_op_id: ledger_op_id.as_deref(),
                approval_queue_id: approval_queue_id.as_deref(),
                created_at,
            })?;
            Ok(entry)
        })
        .await
    }

    /// Track a deferred transfer and append its `pending` message in one
    /// write. Returns the message id and the entry.
    pub async fn record_deferred(
        &self,
        message: NewMessage,
        correlation_id: i64,
        kind: TransferKind,
        metadata: TransferMetadata,
        ledger_op_id: Option<String>,
        approval_queue_id: Option<String>,
    ) -> Result<(i64, TransactionEntry)> {
        let created_at = now_ms();

        run_blocking(&self.db, move |db| {
            db.insert_deferred_transfer(
                &message,
                &PendingTransfer {
                    correlation_id,
                    kind,
                    counterparty: &message.counterparty,
                    metadata: &metadata,
                    ledger_op_id: ledger_op_id.as_deref(),
                    approval_queue_id: approval_queue_id.as_deref(),
                    created_at,
                },
            )
        })
        .await
    }

    pub async fn find_by_approval_queue_id(&self, id: &str) -> Result<Option<TransactionEntry>> {
        let id = id.to_string();
        run_blocking(&self.db, move |db| db.get_transaction_by_approval_queue_id(&id)).await
    }

    pub async fn find_by_correlation(&self, correlation_id: i64) -> Result<Option<TransactionEntry>> {
        run_blocking(&self.db, move |db| db.get_transaction_by_correlation(correlation_id)).await
    }

    /// Move the entry for `ledger_op_id` to a terminal status. Returns true
    /// only for the call that actually changed it.
    pub async fn mark_terminal(&self, ledger_op_id: &str, status: TxStatus) -> Result<bool> {
        let ledger_op_id = ledger_op_id.to_string();
        run_blocking(&self.db, move |db| {
            Ok(db.mark_transaction_terminal(&ledger_op_id, status)? > 0)
        })
        .await
    }

    /// Same as [`mark_terminal`](Self::mark_terminal) for entries the ledger
    /// never assigned an operation id.
    pub async fn mark_terminal_by_correlation(&self, correlation_id: i64, status: TxStatus) -> Result<bool> {
        run_blocking(&self.db, move |db| {
            Ok(db.mark_transaction_terminal_by_correlation(correlation_id, status)? > 0)
        })
        .await
    }

    /// Entries still waiting on the ledger, optionally for one peer.
    pub async fn pending(&self, counterparty: Option<&str>) -> Result<Vec<TransactionEntry>> {
        let counterparty = counterparty.map(str::to_string);
        run_blocking(&self.db, move |db| db.get_pending_transactions(counterparty.as_deref())).await
    }

    /// Confirmed entries whose notification still has to go out, including
    /// claims older than `lease` that were never finished.
    pub async fn due_notifications(&self, lease: Duration) -> Result<Vec<TransactionEntry>> {
        let stale_before = lease_cutoff(lease);
        run_blocking(&self.db, move |db| db.get_due_notifications(stale_before)).await
    }

    /// Take the notification for sending. A claim is honoured for `lease`;
    /// after that another sender may take it over.
    pub async fn claim_notification(&self, id: i64, lease: Duration) -> Result<bool> {
        let now = now_ms();
        let stale_before = lease_cutoff(lease);
        run_blocking(&self.db, move |db| db.claim_notification(id, now, stale_before)).await
    }

    pub async fn finish_notification(&self, id: i64, delivered: bool) -> Result<bool> {
        run_blocking(&self.db, move |db| db.finish_notification(id, delivered)).await
    }
}

fn lease_cutoff(lease: Duration) -> i64 {
    now_ms().saturating_sub(i64::try_from(lease.as_millis()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use charmlink_db::StoreError;
    use charmlink_types::models::NotifyState;

    use crate::error::EngineError;

    fn tracker() -> TransactionTracker {
        TransactionTracker::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    fn meta(amount: i64) -> TransferMetadata {
        TransferMetadata {
            amount,
            display_name: "bob".into(),
            charm_id: None,
            token: Some("USDC".into()),
        }
    }

    #[tokio::test]
    async fn record_pending_is_idempotent() {
        let t = tracker();
        let a = t
            .record_pending(1, TransferKind::Token, "bob", meta(5), Some("op".into()), Some("q".into()))
            .await
            .unwrap();
        let b = t
            .record_pending(1, TransferKind::Token, "bob", meta(5), Some("op".into()), Some("q".into()))
            .await
            .unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn record_pending_conflict_is_loud() {
        let t = tracker();
        t.record_pending(1, TransferKind::Token, "bob", meta(5), None, None).await.unwrap();
        let err = t
            .record_pending(1, TransferKind::Token, "bob", meta(6), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Store(StoreError::Conflict(1))));
    }

    #[tokio::test]
    async fn terminal_never_flips() {
        let t = tracker();
        t.record_pending(1, TransferKind::Token, "bob", meta(5), Some("op".into()), None)
            .await
            .unwrap();

        assert!(t.mark_terminal("op", TxStatus::Rejected).await.unwrap());
        assert!(!t.mark_terminal("op", TxStatus::Confirmed).await.unwrap());
        assert!(!t.mark_terminal_by_correlation(1, TxStatus::Confirmed).await.unwrap());

        let entry = t.find_by_correlation(1).await.unwrap().unwrap();
        assert_eq!(entry.status, TxStatus::Rejected);
        assert_eq!(entry.notify_state, NotifyState::None);
    }

    #[tokio::test]
    async fn pending_filters_by_peer() {
        let t = tracker();
        t.record_pending(1, TransferKind::Token, "bob", meta(5), None, None).await.unwrap();
        t.record_pending(2, TransferKind::Token, "carol", meta(5), None, None).await.unwrap();

        assert_eq!(t.pending(None).await.unwrap().len(), 2);
        let bob = t.pending(Some("bob")).await.unwrap();
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].correlation_id, 1);
    }

    #[tokio::test]
    async fn unfinished_claim_expires_after_lease() {
        let t = tracker();
        let entry = t
            .record_pending(1, TransferKind::Token, "bob", meta(5), Some("op".into()), None)
            .await
            .unwrap();
        t.mark_terminal("op", TxStatus::Confirmed).await.unwrap();

        let lease = Duration::from_secs(60);
        assert!(t.claim_notification(entry.id, lease).await.unwrap());
        assert!(!t.claim_notification(entry.id, lease).await.unwrap());
        assert!(t.due_notifications(lease).await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(t.due_notifications(Duration::ZERO).await.unwrap().len(), 1);
        assert!(t.claim_notification(entry.id, Duration::ZERO).await.unwrap());
        assert!(t.finish_notification(entry.id, true).await.unwrap());
        assert_eq!(t.find_by_correlation(1).await.unwrap().unwrap().notify_state, NotifyState::Sent);
    }

    #[tokio::test]
    async fn deferred_message_and_entry_are_written_together() {
        let t = tracker();
        let message = NewMessage {
            room: "dm-bob".into(),
            counterparty: "bob".into(),
            username: "alice".into(),
            own: true,
            content_type: charmlink_types::models::ContentType::Token,
            payload: "{}".into(),
            filedata: None,
            amount: 5,
            correlation_id: Some(7),
            timestamp: 7,
            state: charmlink_types::models::MessageState::Pending,
        };

        let (id, entry) = t
            .record_deferred(message, 7, TransferKind::Token, meta(5), Some("op".into()), Some("q".into()))
            .await
            .unwrap();
        assert!(id > 0);
        assert_eq!(entry.counterparty, "bob");
        assert_eq!(t.find_by_approval_queue_id("q").await.unwrap(), Some(entry));
    }
}
