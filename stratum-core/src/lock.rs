//! Soft-lock state for cache entries.
//!
//! A soft lock is a logical, timed lock on a cache entry (not a row lock):
//! it marks the entry as in-doubt while the owning transaction's write is
//! in flight. Readers from other transactions miss instead of blocking; a
//! holder that outlives its deadline loses the lock to the next acquirer.

use crate::key::TxnId;
use std::time::{Duration, Instant};

/// A held soft lock: who holds it and until when.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftLock {
    pub owner: TxnId,
    pub deadline: Instant,
}

impl SoftLock {
    pub fn new(owner: TxnId, lease: Duration) -> Self {
        Self {
            owner,
            deadline: Instant::now() + lease,
        }
    }

    /// Check if the holder outlived its lease.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Remaining lease, or None once expired.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline.checked_duration_since(now)
    }
}

/// Lock state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockState {
    #[default]
    Unlocked,
    SoftLocked(SoftLock),
}

impl LockState {
    pub fn is_unlocked(&self) -> bool {
        matches!(self, LockState::Unlocked)
    }

    /// The transaction holding the lock, if any.
    pub fn holder(&self) -> Option<TxnId> {
        match self {
            LockState::Unlocked => None,
            LockState::SoftLocked(lock) => Some(lock.owner),
        }
    }

    /// Whether this state blocks the given transaction at `now`.
    ///
    /// A lock blocks every transaction except its owner, until it expires.
    pub fn blocks(&self, txn_id: TxnId, now: Instant) -> bool {
        match self {
            LockState::Unlocked => false,
            LockState::SoftLocked(lock) => lock.owner != txn_id && !lock.is_expired(now),
        }
    }
}
