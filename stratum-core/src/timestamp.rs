//! Logical timestamps ordering transactions and cache writes.
//!
//! Every session start, transaction begin, flush, and commit draws a value
//! from one process-wide [`TimestampSource`]; region and query-cache
//! staleness checks are comparisons between these values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// A point in the process-wide write history.
///
/// Timestamps are monotonically increasing and totally ordered; two calls
/// to [`TimestampSource::next`] never return the same value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Beginning of time; everything is visible to a reader at ZERO's
    /// successor, nothing was written before it.
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn new(sequence: i64) -> Self {
        Timestamp(sequence)
    }

    pub fn sequence(self) -> i64 {
        self.0
    }

    /// Check if this timestamp is strictly newer than another.
    pub fn is_newer_than(self, other: Timestamp) -> bool {
        self.0 > other.0
    }

    /// Check if this timestamp is at least as fresh as another.
    pub fn is_at_least(self, other: Timestamp) -> bool {
        self.0 >= other.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Process-wide monotonic timestamp source.
///
/// One instance is owned by the cache manager for its whole lifetime; the
/// persistence engine draws session/transaction timestamps from it so that
/// cache writes and reader horizons share a single order.
#[derive(Debug)]
pub struct TimestampSource {
    next: AtomicI64,
}

impl TimestampSource {
    pub fn new() -> Self {
        Self {
            next: AtomicI64::new(1),
        }
    }

    /// Draw the next timestamp. Never repeats, never goes backwards.
    pub fn next(&self) -> Timestamp {
        Timestamp(self.next.fetch_add(1, Ordering::SeqCst))
    }

    /// The most recently issued timestamp, or [`Timestamp::ZERO`] if none.
    pub fn current(&self) -> Timestamp {
        Timestamp(self.next.load(Ordering::SeqCst) - 1)
    }
}

impl Default for TimestampSource {
    fn default() -> Self {
        Self::new()
    }
}
