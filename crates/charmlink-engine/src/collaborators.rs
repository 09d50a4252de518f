use std::collections::HashSet;

use charmlink_types::models::{Contact, TransferKind, TransferMetadata};

use crate::error::{LedgerError, TransportError};

/// Outcome of handing a transfer to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub ledger_op_id: Option<String>,
    pub approval_queue_id: Option<String>,
    /// The operation sits in the approval queue instead of executing now.
    pub deferred: bool,
}

/// What the ledger currently says about an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Rejected,
    Pending,
}

/// The value-transfer system. Write operations may be deferred into a
/// user-approval queue with unbounded latency.
#[async_trait::async_trait]
pub trait Ledger: Send + Sync {
    async fn submit_transfer(
        &self,
        kind: TransferKind,
        address: &str,
        amount: i64,
        metadata: &TransferMetadata,
    ) -> Result<Submission, LedgerError>;

    async fn confirmation_status(&self, ledger_op_id: &str) -> Result<Confirmation, LedgerError>;

    /// Ids currently waiting for user approval.
    async fn list_approval_queue(&self) -> Result<HashSet<String>, LedgerError>;

    async fn get_contacts(&self) -> Result<Vec<Contact>, LedgerError>;
}

/// Store-and-forward peer-to-peer channel. `wire` is the already encoded
/// envelope; `channel` is the application name.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, wire: &str, destination: &str, channel: &str) -> Result<(), TransportError>;
}
