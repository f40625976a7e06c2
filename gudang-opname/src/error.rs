use chrono::{DateTime, Utc};
use gudang_core::StockKey;
use gudang_ledger::LedgerError;
use thiserror::Error;
use uuid::Uuid;

use crate::OpnameStatus;

/// Result alias for opname workflow operations.
pub type OpnameResult<T> = Result<T, OpnameError>;

/// Error taxonomy of the opname workflow.
///
/// Validation, conflict, and not-found errors abort before the first ledger
/// mutation; only recalculation retries are handled below this surface.
#[derive(Debug, Error)]
pub enum OpnameError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Conflict(#[from] Conflict),
    #[error("opname {0} not found")]
    OpnameNotFound(Uuid),
    #[error("unknown product: {0}")]
    ProductNotFound(String),
    #[error("unknown location: {0}")]
    LocationNotFound(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for OpnameError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(value.to_string())
    }
}

/// State-machine conflicts: the request is well-formed but the transition is
/// not legal right now.
#[derive(Debug, Error)]
pub enum Conflict {
    #[error("opname {0} is already approved")]
    AlreadyApproved(Uuid),
    #[error("opname {id} is {status}, expected pending")]
    NotPending { id: Uuid, status: OpnameStatus },
    #[error("opname {0} has not been approved")]
    NotApproved(Uuid),
    #[error(
        "history of {key} up to {existing_timestamp} is already claimed by approved opname {existing}"
    )]
    OverlappingOpname {
        key: StockKey,
        existing: Uuid,
        existing_timestamp: DateTime<Utc>,
    },
    #[error("movement at {timestamp} falls inside history claimed by approved opname {existing}")]
    LockedHistory {
        timestamp: DateTime<Utc>,
        existing: Uuid,
    },
}
