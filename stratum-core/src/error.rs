//! Error types for STRATUM cache operations.
//!
//! A cache miss is not an error: `get`/`lookup` return `Option` and the
//! caller falls back to its source of truth. Errors here are strategy
//! violations and lifecycle misuse.

use crate::key::{CacheKey, TxnId};
use std::time::Duration;
use thiserror::Error;

/// Cache subsystem errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// A read-only entry was written after creation. Surfaces at commit
    /// and aborts the whole transaction.
    #[error("Read-only entry {key} cannot be updated after creation")]
    ReadOnlyViolation { key: CacheKey },

    /// A transaction waited past the deadline for another transaction's
    /// soft lock. Retryable contention.
    #[error("Timed out after {waited:?} waiting for soft lock on {key}")]
    LockTimeout { key: CacheKey, waited: Duration },

    /// The cache manager has been closed.
    #[error("Cache manager is closed")]
    Closed,

    /// Notification for a transaction the manager has never seen or has
    /// already completed.
    #[error("Unknown transaction {txn_id}")]
    UnknownTransaction { txn_id: TxnId },
}

pub type CacheResult<T> = Result<T, CacheError>;
