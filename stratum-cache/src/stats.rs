//! Statistics counters for cache observability.
//!
//! One collector is shared by every region, the query cache, and the
//! persistence engine (which reports executed statements). Counters move
//! exactly once per logical event and never speculatively; scenario tests
//! assert exact deltas between snapshots.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters shared across sessions.
#[derive(Debug, Default)]
pub struct StatisticsCollector {
    statement_count: AtomicU64,
    query_cache_hit: AtomicU64,
    query_cache_miss: AtomicU64,
    second_level_hit: AtomicU64,
    second_level_miss: AtomicU64,
    second_level_put: AtomicU64,
}

impl StatisticsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A statement executed against the source of truth.
    pub fn record_statement(&self) {
        self.statement_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query_hit(&self) {
        self.query_cache_hit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query_miss(&self) {
        self.query_cache_miss.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_second_level_hit(&self) {
        self.second_level_hit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_second_level_miss(&self) {
        self.second_level_miss.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_second_level_put(&self) {
        self.second_level_put.fetch_add(1, Ordering::Relaxed);
    }

    pub fn statement_count(&self) -> u64 {
        self.statement_count.load(Ordering::Relaxed)
    }

    pub fn query_cache_hit(&self) -> u64 {
        self.query_cache_hit.load(Ordering::Relaxed)
    }

    pub fn second_level_hit(&self) -> u64 {
        self.second_level_hit.load(Ordering::Relaxed)
    }

    pub fn second_level_put(&self) -> u64 {
        self.second_level_put.load(Ordering::Relaxed)
    }

    /// Capture a point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            statement_count: self.statement_count.load(Ordering::Relaxed),
            query_cache_hit: self.query_cache_hit.load(Ordering::Relaxed),
            query_cache_miss: self.query_cache_miss.load(Ordering::Relaxed),
            second_level_hit: self.second_level_hit.load(Ordering::Relaxed),
            second_level_miss: self.second_level_miss.load(Ordering::Relaxed),
            second_level_put: self.second_level_put.load(Ordering::Relaxed),
            captured_at: Utc::now(),
        }
    }
}

/// Point-in-time counter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub statement_count: u64,
    pub query_cache_hit: u64,
    pub query_cache_miss: u64,
    pub second_level_hit: u64,
    pub second_level_miss: u64,
    pub second_level_put: u64,
    pub captured_at: DateTime<Utc>,
}

impl StatsSnapshot {
    /// Counter movement since an earlier snapshot.
    pub fn delta_since(&self, earlier: &StatsSnapshot) -> StatsDelta {
        StatsDelta {
            statements: self.statement_count - earlier.statement_count,
            query_hits: self.query_cache_hit - earlier.query_cache_hit,
            query_misses: self.query_cache_miss - earlier.query_cache_miss,
            second_level_hits: self.second_level_hit - earlier.second_level_hit,
            second_level_misses: self.second_level_miss - earlier.second_level_miss,
            second_level_puts: self.second_level_put - earlier.second_level_put,
        }
    }

    /// Second-level hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.second_level_hit + self.second_level_miss;
        if total == 0 {
            0.0
        } else {
            self.second_level_hit as f64 / total as f64
        }
    }
}

/// Counter movement between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsDelta {
    pub statements: u64,
    pub query_hits: u64,
    pub query_misses: u64,
    pub second_level_hits: u64,
    pub second_level_misses: u64,
    pub second_level_puts: u64,
}
