//! Cache regions: one keyed store per entity type, governed by a
//! concurrency strategy.
//!
//! A region holds disassembled entity state keyed by row id, plus an
//! invalidation horizon (`invalidated_at`). Visibility, population, and
//! locking rules are dispatched on the region's [`Strategy`]:
//!
//! - `None`: gets always miss, puts are no-ops, statistics untouched.
//! - `ReadOnly`: seeded once per key, timestamp-agnostic hits forever.
//! - `ReadWrite`: soft-lock protocol plus timestamp visibility; a reader
//!   whose transaction predates the last invalidation misses.
//! - `NonstrictReadWrite`: timestamp-agnostic hits, invalidate-on-write.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use stratum_core::{LockState, RegionName, SoftLock, Strategy, Timestamp, TxnId, VisibilityRule};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::stats::StatisticsCollector;

/// One cached entry: disassembled state, its write timestamp, and lock state.
///
/// `value` is `None` for a lock placeholder: a key that was soft-locked
/// before anything was cached under it. Placeholders miss on read and are
/// removed when the lock is released without a commit.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Option<Value>,
    write_ts: Timestamp,
    lock: LockState,
}

/// Outcome of a single soft-lock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAttempt {
    /// Lock acquired (or re-entered by its owner).
    Acquired,
    /// Held by another live transaction; caller may wait and retry.
    Busy,
    /// Nothing cached under the key and placeholders were not requested.
    Absent,
}

/// A keyed store for one entity type.
pub struct CacheRegion {
    name: RegionName,
    strategy: Strategy,
    visibility: VisibilityRule,
    stats: Arc<StatisticsCollector>,
    entries: RwLock<HashMap<Uuid, CacheEntry>>,
    /// Horizon of the last invalidating event (read-write commit or
    /// explicit per-key invalidation). Readers older than this miss;
    /// loads older than this are refused for read-only/read-write.
    invalidated_at: AtomicI64,
}

impl CacheRegion {
    pub fn new(
        name: RegionName,
        strategy: Strategy,
        visibility: VisibilityRule,
        stats: Arc<StatisticsCollector>,
    ) -> Self {
        Self {
            name,
            strategy,
            visibility,
            stats,
            entries: RwLock::new(HashMap::new()),
            invalidated_at: AtomicI64::new(Timestamp::ZERO.sequence()),
        }
    }

    pub fn name(&self) -> &RegionName {
        &self.name
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn invalidated_at(&self) -> Timestamp {
        Timestamp::new(self.invalidated_at.load(Ordering::SeqCst))
    }

    /// Whether a value (not a bare lock placeholder) is cached under the
    /// key, regardless of locks or visibility. Touches no statistics.
    pub async fn contains(&self, row_id: Uuid) -> bool {
        self.entries
            .read()
            .await
            .get(&row_id)
            .is_some_and(|entry| entry.value.is_some())
    }

    /// Number of entries, lock placeholders included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Read an entry on behalf of a transaction.
    ///
    /// Hits only if the entry exists, carries a value, is not soft-locked
    /// by a different live transaction, and, for read-write regions, both
    /// the entry's write timestamp and the region's invalidation horizon
    /// are visible to `reader_ts`.
    pub async fn get(
        &self,
        row_id: Uuid,
        reader_ts: Timestamp,
        reader_txn: Option<TxnId>,
    ) -> Option<Value> {
        if !self.strategy.is_caching() {
            return None;
        }

        let entries = self.entries.read().await;
        let now = Instant::now();
        let hit = entries.get(&row_id).and_then(|entry| {
            if lock_blocks(&entry.lock, reader_txn, now) {
                return None;
            }
            let value = entry.value.as_ref()?;
            if self.strategy.is_timestamp_sensitive() {
                if !self.visibility.visible(entry.write_ts, reader_ts) {
                    return None;
                }
                if !reader_ts.is_at_least(self.invalidated_at()) {
                    return None;
                }
            }
            Some(value.clone())
        });
        drop(entries);

        match hit {
            Some(value) => {
                self.stats.record_second_level_hit();
                Some(value)
            }
            None => {
                self.stats.record_second_level_miss();
                None
            }
        }
    }

    /// Populate the region after a source-of-truth read.
    ///
    /// `load_ts` is the loading transaction's start timestamp and guards
    /// the race with invalidation: a load begun before the horizon moved
    /// is refused for read-only/read-write regions. `cached_at` is when
    /// the value lands in the cache and is what later readers are judged
    /// against; a transaction begun before it never sees the entry.
    ///
    /// Read-only and read-write entries are never replaced by a load: an
    /// existing entry wins (without versions there is no way to tell
    /// which state is fresher). Nonstrict regions accept the load either
    /// way.
    ///
    /// Returns true (and counts a put) only when something was stored.
    pub async fn put_from_load(
        &self,
        row_id: Uuid,
        value: Value,
        load_ts: Timestamp,
        cached_at: Timestamp,
    ) -> bool {
        if !self.strategy.is_caching() {
            return false;
        }

        let mut entries = self.entries.write().await;
        let stored = match entries.get_mut(&row_id) {
            Some(existing) => match self.strategy {
                Strategy::ReadOnly | Strategy::ReadWrite => false,
                Strategy::NonstrictReadWrite => {
                    existing.value = Some(value);
                    existing.write_ts = cached_at;
                    true
                }
                Strategy::None => false,
            },
            None => {
                if self.strategy != Strategy::NonstrictReadWrite
                    && !load_ts.is_newer_than(self.invalidated_at())
                {
                    false
                } else {
                    entries.insert(
                        row_id,
                        CacheEntry {
                            value: Some(value),
                            write_ts: cached_at,
                            lock: LockState::Unlocked,
                        },
                    );
                    true
                }
            }
        };
        drop(entries);

        if stored {
            self.stats.record_second_level_put();
        }
        stored
    }

    /// One soft-lock attempt for a writing transaction.
    ///
    /// Re-entry by the owner extends the lease. An expired foreign lock is
    /// evicted and taken over (the holder outlived its deadline; its write
    /// is in doubt, so the stale value goes too). With `lock_absent`, a
    /// placeholder entry is created so concurrent loads cannot slip a
    /// possibly-stale value under the writer.
    pub async fn try_soft_lock(
        &self,
        row_id: Uuid,
        txn_id: TxnId,
        lease: Duration,
        lock_absent: bool,
    ) -> LockAttempt {
        let mut entries = self.entries.write().await;
        let now = Instant::now();

        match entries.get_mut(&row_id) {
            Some(entry) => match entry.lock {
                LockState::Unlocked => {
                    entry.lock = LockState::SoftLocked(SoftLock::new(txn_id, lease));
                    LockAttempt::Acquired
                }
                LockState::SoftLocked(lock) if lock.owner == txn_id => {
                    entry.lock = LockState::SoftLocked(SoftLock::new(txn_id, lease));
                    LockAttempt::Acquired
                }
                LockState::SoftLocked(lock) if lock.is_expired(now) => {
                    tracing::debug!(
                        region = %self.name,
                        %row_id,
                        stale_owner = %lock.owner,
                        "taking over expired soft lock"
                    );
                    entry.value = None;
                    entry.lock = LockState::SoftLocked(SoftLock::new(txn_id, lease));
                    LockAttempt::Acquired
                }
                LockState::SoftLocked(_) => LockAttempt::Busy,
            },
            None if lock_absent => {
                entries.insert(
                    row_id,
                    CacheEntry {
                        value: None,
                        write_ts: Timestamp::ZERO,
                        lock: LockState::SoftLocked(SoftLock::new(txn_id, lease)),
                    },
                );
                LockAttempt::Acquired
            }
            None => LockAttempt::Absent,
        }
    }

    /// Release a soft lock without writing (rollback path).
    ///
    /// The entry reverts to its pre-lock value; a bare placeholder is
    /// removed. Releasing a lock the transaction does not hold is a no-op.
    pub async fn release_lock(&self, row_id: Uuid, txn_id: TxnId) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&row_id) {
            if entry.lock.holder() == Some(txn_id) {
                entry.lock = LockState::Unlocked;
                if entry.value.is_none() {
                    entries.remove(&row_id);
                }
            }
        }
    }

    /// Apply a committed write: release the transaction's lock, store the
    /// new value at the commit timestamp, and move the invalidation
    /// horizon so older readers fall back to the source of truth.
    ///
    /// Refused if another live transaction holds the lock (its in-doubt
    /// write must not be clobbered by a racing committer).
    pub async fn commit_write(
        &self,
        row_id: Uuid,
        value: Value,
        commit_ts: Timestamp,
        txn_id: TxnId,
    ) -> bool {
        let mut entries = self.entries.write().await;
        let now = Instant::now();

        if let Some(entry) = entries.get(&row_id) {
            if lock_blocks(&entry.lock, Some(txn_id), now) {
                return false;
            }
        }
        entries.insert(
            row_id,
            CacheEntry {
                value: Some(value),
                write_ts: commit_ts,
                lock: LockState::Unlocked,
            },
        );
        self.invalidated_at
            .fetch_max(commit_ts.sequence(), Ordering::SeqCst);
        drop(entries);

        self.stats.record_second_level_put();
        true
    }

    /// Remove an entry unconditionally (concurrent-write detection path).
    ///
    /// For read-only/read-write regions the invalidation horizon moves so
    /// a racing stale put cannot resurrect the entry; nonstrict regions
    /// may be repopulated by the very next load.
    pub async fn invalidate(&self, row_id: Uuid, at: Timestamp) {
        let mut entries = self.entries.write().await;
        let removed = entries.remove(&row_id).is_some();
        if self.strategy != Strategy::NonstrictReadWrite {
            self.invalidated_at.fetch_max(at.sequence(), Ordering::SeqCst);
        }
        drop(entries);
        if removed {
            tracing::debug!(region = %self.name, %row_id, "invalidated cache entry");
        }
    }

    /// Clear the region. Does not move the invalidation horizon, so the
    /// region is immediately safe to repopulate; repeated calls are
    /// idempotent.
    pub async fn evict_all(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
    }
}

/// Whether `lock` blocks a reader/writer from `reader_txn` at `now`.
/// A lock never blocks its owner; an expired lock blocks nobody.
fn lock_blocks(lock: &LockState, reader_txn: Option<TxnId>, now: Instant) -> bool {
    match reader_txn {
        Some(txn) => lock.blocks(txn, now),
        None => matches!(lock, LockState::SoftLocked(held) if !held.is_expired(now)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn region(strategy: Strategy) -> CacheRegion {
        CacheRegion::new(
            RegionName::new("orders"),
            strategy,
            VisibilityRule::Inclusive,
            Arc::new(StatisticsCollector::new()),
        )
    }

    #[tokio::test]
    async fn test_none_strategy_never_caches() {
        let region = region(Strategy::None);
        let id = Uuid::now_v7();

        assert!(!region.put_from_load(id, json!({"n": 1}), Timestamp::new(1), Timestamp::new(1)).await);
        assert_eq!(region.get(id, Timestamp::new(9), None).await, None);

        // Statistics untouched either way.
        let snap = region.stats.snapshot();
        assert_eq!(snap.second_level_hit, 0);
        assert_eq!(snap.second_level_miss, 0);
        assert_eq!(snap.second_level_put, 0);
    }

    #[tokio::test]
    async fn test_round_trip_put_then_get() {
        let region = region(Strategy::ReadWrite);
        let id = Uuid::now_v7();
        let value = json!({"name": "first"});

        assert!(region.put_from_load(id, value.clone(), Timestamp::new(3), Timestamp::new(3)).await);
        assert_eq!(
            region.get(id, Timestamp::new(3), None).await,
            Some(value.clone())
        );
        assert_eq!(region.get(id, Timestamp::new(8), None).await, Some(value));
    }

    #[tokio::test]
    async fn test_read_write_entry_invisible_to_older_reader() {
        let region = region(Strategy::ReadWrite);
        let id = Uuid::now_v7();

        region.put_from_load(id, json!({"n": 1}), Timestamp::new(5), Timestamp::new(5)).await;

        // Reader whose transaction started before the write misses.
        assert_eq!(region.get(id, Timestamp::new(4), None).await, None);
        // Boundary-equal is visible under the Inclusive default.
        assert!(region.get(id, Timestamp::new(5), None).await.is_some());
    }

    #[tokio::test]
    async fn test_reader_between_load_and_caching_misses() {
        let region = region(Strategy::ReadWrite);
        let id = Uuid::now_v7();

        // Loaded by a transaction begun at t1 but cached at t5; a reader
        // begun in between cannot prove it saw this state and misses.
        region.put_from_load(id, json!({"n": 1}), Timestamp::new(1), Timestamp::new(5)).await;
        assert_eq!(region.get(id, Timestamp::new(3), None).await, None);
        assert!(region.get(id, Timestamp::new(5), None).await.is_some());
    }

    #[tokio::test]
    async fn test_exclusive_visibility_flips_boundary() {
        let region = CacheRegion::new(
            RegionName::new("orders"),
            Strategy::ReadWrite,
            VisibilityRule::Exclusive,
            Arc::new(StatisticsCollector::new()),
        );
        let id = Uuid::now_v7();

        region.put_from_load(id, json!({"n": 1}), Timestamp::new(5), Timestamp::new(5)).await;
        assert_eq!(region.get(id, Timestamp::new(5), None).await, None);
        assert!(region.get(id, Timestamp::new(6), None).await.is_some());
    }

    #[tokio::test]
    async fn test_read_only_hits_are_timestamp_agnostic() {
        let region = region(Strategy::ReadOnly);
        let id = Uuid::now_v7();

        region.put_from_load(id, json!({"n": 1}), Timestamp::new(50), Timestamp::new(50)).await;
        // Even a reader older than the write hits: immutable data needs no
        // staleness check.
        assert!(region.get(id, Timestamp::new(1), None).await.is_some());
    }

    #[tokio::test]
    async fn test_minimal_puts_existing_entry_wins() {
        let region = region(Strategy::ReadWrite);
        let id = Uuid::now_v7();

        assert!(region.put_from_load(id, json!({"v": "a"}), Timestamp::new(2), Timestamp::new(2)).await);
        assert!(!region.put_from_load(id, json!({"v": "b"}), Timestamp::new(7), Timestamp::new(7)).await);

        assert_eq!(
            region.get(id, Timestamp::new(9), None).await,
            Some(json!({"v": "a"}))
        );
        assert_eq!(region.stats.snapshot().second_level_put, 1);
    }

    #[tokio::test]
    async fn test_soft_lock_hides_entry_from_other_txns() {
        let region = region(Strategy::ReadWrite);
        let id = Uuid::now_v7();
        let writer = Uuid::now_v7();
        let reader = Uuid::now_v7();

        region.put_from_load(id, json!({"n": 1}), Timestamp::new(1), Timestamp::new(1)).await;
        let attempt = region
            .try_soft_lock(id, writer, Duration::from_secs(60), false)
            .await;
        assert_eq!(attempt, LockAttempt::Acquired);

        // Foreign transactions and sessionless readers miss; the owner
        // still sees the pre-lock value.
        assert_eq!(region.get(id, Timestamp::new(9), Some(reader)).await, None);
        assert_eq!(region.get(id, Timestamp::new(9), None).await, None);
        assert!(region.get(id, Timestamp::new(9), Some(writer)).await.is_some());
    }

    #[tokio::test]
    async fn test_lock_contention_reports_busy() {
        let region = region(Strategy::ReadWrite);
        let id = Uuid::now_v7();
        let first = Uuid::now_v7();
        let second = Uuid::now_v7();

        region.put_from_load(id, json!({"n": 1}), Timestamp::new(1), Timestamp::new(1)).await;
        region
            .try_soft_lock(id, first, Duration::from_secs(60), false)
            .await;

        let attempt = region
            .try_soft_lock(id, second, Duration::from_secs(60), false)
            .await;
        assert_eq!(attempt, LockAttempt::Busy);

        // Re-entry by the holder succeeds.
        let attempt = region
            .try_soft_lock(id, first, Duration::from_secs(60), false)
            .await;
        assert_eq!(attempt, LockAttempt::Acquired);
    }

    #[tokio::test]
    async fn test_expired_lock_taken_over() {
        let region = region(Strategy::ReadWrite);
        let id = Uuid::now_v7();
        let stale = Uuid::now_v7();
        let next = Uuid::now_v7();

        region.put_from_load(id, json!({"n": 1}), Timestamp::new(1), Timestamp::new(1)).await;
        region.try_soft_lock(id, stale, Duration::ZERO, false).await;
        tokio::time::sleep(Duration::from_millis(2)).await;

        let attempt = region
            .try_soft_lock(id, next, Duration::from_secs(60), false)
            .await;
        assert_eq!(attempt, LockAttempt::Acquired);

        // The stale holder's value went with its lock.
        assert_eq!(region.get(id, Timestamp::new(9), Some(next)).await, None);
    }

    #[tokio::test]
    async fn test_rollback_restores_pre_lock_value() {
        let region = region(Strategy::ReadWrite);
        let id = Uuid::now_v7();
        let writer = Uuid::now_v7();
        let before = json!({"v": "committed"});

        region.put_from_load(id, before.clone(), Timestamp::new(1), Timestamp::new(1)).await;
        region
            .try_soft_lock(id, writer, Duration::from_secs(60), false)
            .await;
        region.release_lock(id, writer).await;

        assert_eq!(region.get(id, Timestamp::new(9), None).await, Some(before));
    }

    #[tokio::test]
    async fn test_releasing_placeholder_removes_it() {
        let region = region(Strategy::ReadWrite);
        let id = Uuid::now_v7();
        let writer = Uuid::now_v7();

        region
            .try_soft_lock(id, writer, Duration::from_secs(60), true)
            .await;
        assert_eq!(region.len().await, 1);

        region.release_lock(id, writer).await;
        assert!(region.is_empty().await);
    }

    #[tokio::test]
    async fn test_commit_write_bumps_horizon() {
        let region = region(Strategy::ReadWrite);
        let id = Uuid::now_v7();
        let writer = Uuid::now_v7();

        region.put_from_load(id, json!({"v": "old"}), Timestamp::new(1), Timestamp::new(1)).await;
        region
            .try_soft_lock(id, writer, Duration::from_secs(60), false)
            .await;
        assert!(
            region
                .commit_write(id, json!({"v": "new"}), Timestamp::new(10), writer)
                .await
        );

        assert_eq!(region.invalidated_at(), Timestamp::new(10));
        // A transaction begun before the commit must not see the write.
        assert_eq!(region.get(id, Timestamp::new(5), None).await, None);
        // A newer transaction sees the committed value.
        assert_eq!(
            region.get(id, Timestamp::new(10), None).await,
            Some(json!({"v": "new"}))
        );
    }

    #[tokio::test]
    async fn test_commit_refused_under_foreign_lock() {
        let region = region(Strategy::ReadWrite);
        let id = Uuid::now_v7();
        let holder = Uuid::now_v7();
        let racer = Uuid::now_v7();

        region.put_from_load(id, json!({"v": "old"}), Timestamp::new(1), Timestamp::new(1)).await;
        region
            .try_soft_lock(id, holder, Duration::from_secs(60), false)
            .await;

        assert!(
            !region
                .commit_write(id, json!({"v": "race"}), Timestamp::new(9), racer)
                .await
        );
    }

    #[tokio::test]
    async fn test_stale_load_refused_after_invalidation() {
        let region = region(Strategy::ReadWrite);
        let id = Uuid::now_v7();
        let writer = Uuid::now_v7();

        region.put_from_load(id, json!({"v": "old"}), Timestamp::new(1), Timestamp::new(1)).await;
        region
            .try_soft_lock(id, writer, Duration::from_secs(60), false)
            .await;
        region
            .commit_write(id, json!({"v": "new"}), Timestamp::new(10), writer)
            .await;
        region.invalidate(id, Timestamp::new(10)).await;

        // A load carrying a pre-invalidation timestamp loses the race.
        assert!(!region.put_from_load(id, json!({"v": "stale"}), Timestamp::new(4), Timestamp::new(4)).await);
        // A load from a newer reader repopulates.
        assert!(region.put_from_load(id, json!({"v": "fresh"}), Timestamp::new(11), Timestamp::new(11)).await);
    }

    #[tokio::test]
    async fn test_nonstrict_invalidate_then_reload() {
        let region = region(Strategy::NonstrictReadWrite);
        let id = Uuid::now_v7();

        region.put_from_load(id, json!({"v": "old"}), Timestamp::new(1), Timestamp::new(1)).await;
        region.invalidate(id, Timestamp::new(2)).await;

        // Guaranteed miss before repopulation, never the stale value.
        assert_eq!(region.get(id, Timestamp::new(9), None).await, None);
        // And the very next load repopulates, even with an old timestamp.
        assert!(region.put_from_load(id, json!({"v": "new"}), Timestamp::new(1), Timestamp::new(1)).await);
        assert!(region.get(id, Timestamp::new(1), None).await.is_some());
    }

    #[tokio::test]
    async fn test_evict_all_idempotent_and_repopulatable() {
        let region = region(Strategy::ReadWrite);
        let id = Uuid::now_v7();

        region.put_from_load(id, json!({"n": 1}), Timestamp::new(2), Timestamp::new(2)).await;
        region.evict_all().await;
        region.evict_all().await;
        assert!(region.is_empty().await);

        assert!(region.put_from_load(id, json!({"n": 2}), Timestamp::new(3), Timestamp::new(3)).await);
        assert!(region.get(id, Timestamp::new(3), None).await.is_some());
    }

    #[tokio::test]
    async fn test_hit_miss_statistics() {
        let stats = Arc::new(StatisticsCollector::new());
        let region = CacheRegion::new(
            RegionName::new("orders"),
            Strategy::ReadOnly,
            VisibilityRule::Inclusive,
            Arc::clone(&stats),
        );
        let id = Uuid::now_v7();

        region.get(id, Timestamp::new(1), None).await;
        region.put_from_load(id, json!({"n": 1}), Timestamp::new(1), Timestamp::new(1)).await;
        region.get(id, Timestamp::new(1), None).await;

        let snap = stats.snapshot();
        assert_eq!(snap.second_level_miss, 1);
        assert_eq!(snap.second_level_put, 1);
        assert_eq!(snap.second_level_hit, 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        // Any interleaving of loads and invalidations ends empty after
        // evict_all, and the region accepts fresh state afterwards.
        #[test]
        fn prop_evict_all_always_leaves_empty(ops in prop::collection::vec(any::<bool>(), 0..32)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .expect("runtime");
            rt.block_on(async {
                let region = region(Strategy::NonstrictReadWrite);
                let id = Uuid::now_v7();
                let mut ts = 1;
                for load in ops {
                    if load {
                        region.put_from_load(id, json!({"t": ts}), Timestamp::new(ts), Timestamp::new(ts)).await;
                    } else {
                        region.invalidate(id, Timestamp::new(ts)).await;
                    }
                    ts += 1;
                }
                region.evict_all().await;
                prop_assert!(region.is_empty().await);
                let put_ok = region.put_from_load(id, json!({"t": ts}), Timestamp::new(ts), Timestamp::new(ts)).await;
                prop_assert!(put_ok);
                Ok(())
            })?;
        }
    }
}
