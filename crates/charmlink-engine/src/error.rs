use thiserror::Error;

use charmlink_db::StoreError;
use charmlink_protocol::DecodeError;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    #[error("transport rejected envelope: {0}")]
    Rejected(String),

    #[error("transport http error: {0}")]
    Http(String),
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger unreachable: {0}")]
    Unreachable(String),

    #[error("ledger refused operation: {0}")]
    Rejected(String),

    #[error("ledger http error: {0}")]
    Http(String),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("no ledger contact for {0}")]
    UnknownContact(String),

    #[error("envelope serialization: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("blocking task failed: {0}")]
    Join(String),
}

impl EngineError {
    /// True when the shared database itself is failing, as opposed to a
    /// single bad row or a collaborator error.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::Sqlite(_) | StoreError::LockPoisoned(_)) | Self::Join(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
