//! In-process collaborators for tests and local development.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use tokio::sync::Mutex;

use charmlink_protocol::from_wire;
use charmlink_types::envelope::Envelope;
use charmlink_types::models::{Contact, TransferKind, TransferMetadata};

use crate::collaborators::{Confirmation, Ledger, Submission, Transport};
use crate::error::{LedgerError, TransportError};

/// One envelope handed to [`MemoryTransport::send`].
#[derive(Debug, Clone)]
pub struct SentEnvelope {
    pub destination: String,
    pub channel: String,
    pub wire: String,
    pub envelope: Envelope,
}

/// Transport that records every send instead of delivering it.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    sent: Arc<Mutex<Vec<SentEnvelope>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every send fails with `Unreachable`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<SentEnvelope> {
        self.sent.lock().await.clone()
    }

    /// Sent envelopes of one `type`, in send order.
    pub async fn sent_of_kind(&self, kind: &str) -> Vec<SentEnvelope> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|s| s.envelope.kind == kind)
            .cloned()
            .collect()
    }

    pub async fn take(&self) -> Vec<SentEnvelope> {
        std::mem::take(&mut *self.sent.lock().await)
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, wire: &str, destination: &str, channel: &str) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable(destination.to_string()));
        }
        let envelope = from_wire(wire).map_err(|e| TransportError::Rejected(e.to_string()))?;
        self.sent.lock().await.push(SentEnvelope {
            destination: destination.to_string(),
            channel: channel.to_string(),
            wire: wire.to_string(),
            envelope,
        });
        Ok(())
    }
}

/// A submitted transfer as the fake ledger saw it.
#[derive(Debug, Clone)]
pub struct SubmittedTransfer {
    pub kind: TransferKind,
    pub address: String,
    pub amount: i64,
    pub metadata: TransferMetadata,
    pub submission: Submission,
}

#[derive(Default)]
struct LedgerState {
    contacts: Vec<Contact>,
    statuses: HashMap<String, Confirmation>,
    queue: HashSet<String>,
    submitted: Vec<SubmittedTransfer>,
}

/// Scriptable ledger. Transfers execute immediately unless deferral is on;
/// deferred ones land in the approval queue until [`MemoryLedger::approve`]
/// or [`MemoryLedger::reject`] is called.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    deferred: Arc<AtomicBool>,
    unreachable: Arc<AtomicBool>,
    failing_status: Arc<AtomicUsize>,
    next_op: Arc<AtomicU64>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_deferred(&self, deferred: bool) {
        self.deferred.store(deferred, Ordering::SeqCst);
    }

    /// While set, every call fails with `Unreachable`.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Fail the next `count` status queries with an HTTP error. Other calls
    /// keep working.
    pub fn fail_status_queries(&self, count: usize) {
        self.failing_status.store(count, Ordering::SeqCst);
    }

    pub async fn add_contact(&self, public_key: &str, display_name: &str, address: &str) {
        self.state.lock().await.contacts.push(Contact {
            public_key: public_key.to_string(),
            display_name: display_name.to_string(),
            icon: None,
            addresses: vec![address.to_string()],
        });
    }

    pub async fn submitted(&self) -> Vec<SubmittedTransfer> {
        self.state.lock().await.submitted.clone()
    }

    /// Confirm an operation and drop it from the approval queue.
    pub async fn approve(&self, ledger_op_id: &str) {
        self.resolve(ledger_op_id, Confirmation::Confirmed).await;
    }

    pub async fn reject(&self, ledger_op_id: &str) {
        self.resolve(ledger_op_id, Confirmation::Rejected).await;
    }

    /// Remove an approval-queue entry without deciding the operation.
    pub async fn drop_from_queue(&self, approval_queue_id: &str) {
        self.state.lock().await.queue.remove(approval_queue_id);
    }

    async fn resolve(&self, ledger_op_id: &str, outcome: Confirmation) {
        let mut state = self.state.lock().await;
        state.statuses.insert(ledger_op_id.to_string(), outcome);
        state.queue.remove(&queue_id_for(ledger_op_id));
    }

    fn check_reachable(&self) -> Result<(), LedgerError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unreachable("memory ledger offline".into()));
        }
        Ok(())
    }
}

fn queue_id_for(ledger_op_id: &str) -> String {
    format!("queue-{}", ledger_op_id)
}

#[async_trait::async_trait]
impl Ledger for MemoryLedger {
    async fn submit_transfer(
        &self,
        kind: TransferKind,
        address: &str,
        amount: i64,
        metadata: &TransferMetadata,
    ) -> Result<Submission, LedgerError> {
        self.check_reachable()?;

        let op_id = format!("op-{}", self.next_op.fetch_add(1, Ordering::SeqCst) + 1);
        let deferred = self.deferred.load(Ordering::SeqCst);

        let mut state = self.state.lock().await;
        let submission = if deferred {
            let queue_id = queue_id_for(&op_id);
            state.queue.insert(queue_id.clone());
            state.statuses.insert(op_id.clone(), Confirmation::Pending);
            Submission {
                ledger_op_id: Some(op_id),
                approval_queue_id: Some(queue_id),
                deferred: true,
            }
        } else {
            state.statuses.insert(op_id.clone(), Confirmation::Confirmed);
            Submission {
                ledger_op_id: Some(op_id),
                approval_queue_id: None,
                deferred: false,
            }
        };

        state.submitted.push(SubmittedTransfer {
            kind,
            address: address.to_string(),
            amount,
            metadata: metadata.clone(),
            submission: submission.clone(),
        });
        Ok(submission)
    }

    async fn confirmation_status(&self, ledger_op_id: &str) -> Result<Confirmation, LedgerError> {
        self.check_reachable()?;
        let failing = self
            .failing_status
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LedgerError::Http(format!("status query for {} failed", ledger_op_id)));
        }
        let state = self.state.lock().await;
        state
            .statuses
            .get(ledger_op_id)
            .copied()
            .ok_or_else(|| LedgerError::Rejected(format!("unknown operation {}", ledger_op_id)))
    }

    async fn list_approval_queue(&self) -> Result<HashSet<String>, LedgerError> {
        self.check_reachable()?;
        Ok(self.state.lock().await.queue.clone())
    }

    async fn get_contacts(&self) -> Result<Vec<Contact>, LedgerError> {
        self.check_reachable()?;
        Ok(self.state.lock().await.contacts.clone())
    }
}
