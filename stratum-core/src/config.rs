//! Configuration: per-region concurrency strategies and cache tuning.

use crate::key::RegionName;
use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Concurrency strategy governing one region.
///
/// The set is closed and known at configuration time, so behavior is
/// dispatched by matching on the variant rather than through trait objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Strategy {
    /// No second-level caching: gets always miss, puts are no-ops, and
    /// neither touches statistics.
    #[default]
    None,
    /// Immutable data: seeded once, hit forever, any later write fails the
    /// transaction at commit.
    ReadOnly,
    /// Soft-lock protocol with timestamp visibility; no transaction ever
    /// observes another's uncommitted or not-yet-visible write.
    ReadWrite,
    /// No locking; writes evict immediately and brief staleness before the
    /// eviction is tolerated.
    NonstrictReadWrite,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::None => "none",
            Strategy::ReadOnly => "read-only",
            Strategy::ReadWrite => "read-write",
            Strategy::NonstrictReadWrite => "nonstrict-read-write",
        }
    }

    /// Whether regions with this strategy cache anything at all.
    pub fn is_caching(&self) -> bool {
        !matches!(self, Strategy::None)
    }

    /// Whether `get` must compare entry timestamps against the reader's
    /// horizon. Only read-write isolation needs that; read-only data never
    /// changes and nonstrict explicitly tolerates staleness.
    pub fn is_timestamp_sensitive(&self) -> bool {
        matches!(self, Strategy::ReadWrite)
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tie-break rule for `entry.write_ts == reader_ts`.
///
/// The boundary-equal case is genuinely ambiguous (a reader whose horizon
/// equals a write's timestamp may or may not have "seen" it), so it is
/// configurable rather than hard-coded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VisibilityRule {
    /// Entry visible when `write_ts <= reader_ts`.
    #[default]
    Inclusive,
    /// Entry visible only when `write_ts < reader_ts`.
    Exclusive,
}

impl VisibilityRule {
    /// Whether an entry written at `write_ts` is visible to a reader whose
    /// transaction started at `reader_ts`.
    pub fn visible(&self, write_ts: Timestamp, reader_ts: Timestamp) -> bool {
        match self {
            VisibilityRule::Inclusive => reader_ts.is_at_least(write_ts),
            VisibilityRule::Exclusive => reader_ts.is_newer_than(write_ts),
        }
    }
}

/// Cache-wide configuration.
///
/// Strategies are fixed per region at configuration time; a region not
/// listed falls back to `default_strategy`.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Strategy for regions without an explicit entry.
    pub default_strategy: Strategy,
    /// Per-region strategy table.
    pub regions: HashMap<RegionName, Strategy>,
    /// Soft-lock lease for holders and wait bound for contenders.
    pub lock_timeout: Duration,
    /// How often a contender re-checks a held soft lock.
    pub lock_poll_interval: Duration,
    /// Tie-break at boundary-equal timestamps.
    pub visibility: VisibilityRule,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_strategy: Strategy::None,
            regions: HashMap::new(),
            lock_timeout: Duration::from_secs(5),
            lock_poll_interval: Duration::from_millis(10),
            visibility: VisibilityRule::Inclusive,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a region with an explicit strategy.
    pub fn with_region(mut self, name: impl Into<RegionName>, strategy: Strategy) -> Self {
        self.regions.insert(name.into(), strategy);
        self
    }

    /// Set the fallback strategy for unlisted regions.
    pub fn with_default_strategy(mut self, strategy: Strategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    /// Set the soft-lock lease/wait bound.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the lock contention poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval = interval;
        self
    }

    /// Set the boundary-equal visibility tie-break.
    pub fn with_visibility(mut self, rule: VisibilityRule) -> Self {
        self.visibility = rule;
        self
    }

    /// Strategy for a region, explicit or fallback.
    pub fn strategy_for(&self, name: &RegionName) -> Strategy {
        self.regions
            .get(name)
            .copied()
            .unwrap_or(self.default_strategy)
    }
}
