//! The cache manager: the single value the persistence engine notifies.
//!
//! Owns the entity regions (lazily created, process lifetime), the
//! query-result cache, the table write timestamps, the timestamp source,
//! the statistics collector, and the registry of active transactions.
//! Sessions drive it through notifications: begin/flush/commit/rollback
//! plus the read-path probes. A probe never surfaces an internal problem
//! as anything but a miss; lifecycle misuse is an explicit error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use stratum_core::{
    CacheConfig, CacheError, CacheKey, CacheResult, QueryFingerprint, RegionName, Strategy,
    TableName, Timestamp, TimestampSource, TxnId,
};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::query::QueryResultCache;
use crate::region::{CacheRegion, LockAttempt};
use crate::stats::StatisticsCollector;
use crate::tables::TableTimestamps;

/// A write the transaction has flushed but not yet committed.
#[derive(Debug, Clone)]
struct PendingWrite {
    key: CacheKey,
    table: TableName,
    value: Value,
}

/// Book-keeping for one active transaction.
struct TxnState {
    start_ts: Timestamp,
    locks: Vec<CacheKey>,
    pending: Vec<PendingWrite>,
    /// First fatal problem recorded during the transaction; commit turns
    /// it into an abort.
    violation: Option<CacheError>,
}

impl TxnState {
    fn new(start_ts: Timestamp) -> Self {
        Self {
            start_ts,
            locks: Vec::new(),
            pending: Vec::new(),
            violation: None,
        }
    }
}

pub struct CacheManager {
    config: CacheConfig,
    timestamps: TimestampSource,
    stats: Arc<StatisticsCollector>,
    regions: RwLock<HashMap<RegionName, Arc<CacheRegion>>>,
    queries: QueryResultCache,
    tables: TableTimestamps,
    txns: Mutex<HashMap<TxnId, TxnState>>,
    closed: AtomicBool,
}

impl CacheManager {
    pub fn open(config: CacheConfig) -> Self {
        tracing::info!(
            default_strategy = %config.default_strategy,
            regions = config.regions.len(),
            "opening cache manager"
        );
        let stats = Arc::new(StatisticsCollector::new());
        Self {
            config,
            timestamps: TimestampSource::new(),
            queries: QueryResultCache::new(Arc::clone(&stats)),
            stats,
            regions: RwLock::new(HashMap::new()),
            tables: TableTimestamps::new(),
            txns: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Shut the manager down. Afterwards every mutating notification
    /// fails with [`CacheError::Closed`] and every probe misses.
    pub fn close(&self) {
        tracing::info!("closing cache manager");
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> Arc<StatisticsCollector> {
        Arc::clone(&self.stats)
    }

    /// Draw the next timestamp; the engine orders sessions and
    /// transactions with it.
    pub fn next_timestamp(&self) -> Timestamp {
        self.timestamps.next()
    }

    /// The region for `name`, created on first access with the configured
    /// strategy. Regions live for the process; eviction empties them but
    /// never removes them.
    pub async fn region(&self, name: &RegionName) -> Arc<CacheRegion> {
        if let Some(region) = self.regions.read().await.get(name) {
            return Arc::clone(region);
        }
        let mut regions = self.regions.write().await;
        Arc::clone(regions.entry(name.clone()).or_insert_with(|| {
            let strategy = self.config.strategy_for(name);
            tracing::debug!(region = %name, %strategy, "creating cache region");
            Arc::new(CacheRegion::new(
                name.clone(),
                strategy,
                self.config.visibility,
                Arc::clone(&self.stats),
            ))
        }))
    }

    // ------------------------------------------------------------------
    // Transaction lifecycle
    // ------------------------------------------------------------------

    /// Register a transaction and hand back its start timestamp. All of
    /// the transaction's cache reads are judged against this timestamp.
    pub async fn on_transaction_begin(&self, txn_id: TxnId) -> CacheResult<Timestamp> {
        self.ensure_open()?;
        let mut txns = self.txns.lock().await;
        let start_ts = txns
            .entry(txn_id)
            .or_insert_with(|| TxnState::new(self.timestamps.next()))
            .start_ts;
        Ok(start_ts)
    }

    /// Commit: apply every pending write at a single fresh commit
    /// timestamp, bump the written tables, and release leftover locks.
    ///
    /// A violation recorded during the transaction aborts it here: locks
    /// are released, nothing is applied, and the error is returned. The
    /// transaction is gone from the registry either way.
    pub async fn on_transaction_commit(&self, txn_id: TxnId) -> CacheResult<Timestamp> {
        self.ensure_open()?;
        let state = self
            .txns
            .lock()
            .await
            .remove(&txn_id)
            .ok_or(CacheError::UnknownTransaction { txn_id })?;

        if let Some(violation) = state.violation {
            tracing::warn!(%txn_id, error = %violation, "aborting transaction at commit");
            self.release_locks(&state.locks, txn_id).await;
            return Err(violation);
        }

        let commit_ts = self.timestamps.next();
        for write in &state.pending {
            let region = self.region(write.key.region()).await;
            let row_id = write.key.row_id();
            match region.strategy() {
                Strategy::ReadWrite => {
                    let applied = region
                        .commit_write(row_id, write.value.clone(), commit_ts, txn_id)
                        .await;
                    if !applied {
                        // Our lease expired and someone took the lock; the
                        // entry's fate belongs to them, ours goes stale.
                        region.invalidate(row_id, commit_ts).await;
                    }
                }
                Strategy::ReadOnly => {
                    region
                        .put_from_load(row_id, write.value.clone(), commit_ts, commit_ts)
                        .await;
                }
                Strategy::NonstrictReadWrite => {
                    // Evict again: a reload that raced in between flush and
                    // commit must not survive the commit.
                    region.invalidate(row_id, commit_ts).await;
                }
                Strategy::None => {}
            }
            self.tables.bump(&write.table, commit_ts).await;
        }
        self.release_locks(&state.locks, txn_id).await;

        tracing::debug!(%txn_id, %commit_ts, writes = state.pending.len(), "committed transaction");
        Ok(commit_ts)
    }

    /// Roll back: release every soft lock and discard pending writes,
    /// leaving the cache exactly as before the transaction wrote.
    pub async fn on_transaction_rollback(&self, txn_id: TxnId) -> CacheResult<()> {
        self.ensure_open()?;
        let state = self
            .txns
            .lock()
            .await
            .remove(&txn_id)
            .ok_or(CacheError::UnknownTransaction { txn_id })?;

        self.release_locks(&state.locks, txn_id).await;
        tracing::debug!(%txn_id, discarded = state.pending.len(), "rolled back transaction");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Entity read path
    // ------------------------------------------------------------------

    /// Second-level probe on behalf of a transaction; `None` means fall
    /// back to the source of truth.
    pub async fn get_entity(
        &self,
        key: &CacheKey,
        reader_ts: Timestamp,
        reader_txn: Option<TxnId>,
    ) -> Option<Value> {
        if self.is_closed() {
            return None;
        }
        let region = self.region(key.region()).await;
        region.get(key.row_id(), reader_ts, reader_txn).await
    }

    /// Repopulate after a source-of-truth read. `load_ts` is the loading
    /// transaction's start timestamp; the caching timestamp is drawn
    /// fresh here, so a transaction begun before this call never sees the
    /// entry. Returns whether the value was actually stored (region
    /// strategy may refuse).
    pub async fn on_entity_load(
        &self,
        key: &CacheKey,
        value: Value,
        load_ts: Timestamp,
    ) -> CacheResult<bool> {
        self.ensure_open()?;
        let region = self.region(key.region()).await;
        let cached_at = self.timestamps.next();
        Ok(region
            .put_from_load(key.row_id(), value, load_ts, cached_at)
            .await)
    }

    /// A session flushed a write for `key` inside `txn_id`.
    ///
    /// Strategy dispatch: read-write soft-locks the key (bounded wait,
    /// then [`CacheError::LockTimeout`]); read-only records a violation if
    /// the key is already cached (updates of immutable data abort at
    /// commit) and otherwise treats it as a first insert; nonstrict evicts
    /// immediately. The table timestamp is bumped at flush so cached query
    /// results over it stop being trusted before the commit lands.
    pub async fn on_entity_flush(
        &self,
        key: &CacheKey,
        new_value: Value,
        table: TableName,
        txn_id: TxnId,
    ) -> CacheResult<()> {
        self.ensure_open()?;
        {
            let txns = self.txns.lock().await;
            if !txns.contains_key(&txn_id) {
                return Err(CacheError::UnknownTransaction { txn_id });
            }
        }

        let region = self.region(key.region()).await;
        let row_id = key.row_id();
        let mut locked = false;
        let mut violation = None;

        match region.strategy() {
            Strategy::ReadWrite => {
                self.soft_lock_with_wait(&region, key, txn_id).await?;
                locked = true;
            }
            Strategy::ReadOnly => {
                if region.contains(row_id).await {
                    tracing::warn!(%key, %txn_id, "write to cached read-only entity");
                    violation = Some(CacheError::ReadOnlyViolation { key: key.clone() });
                }
            }
            Strategy::NonstrictReadWrite => {
                region.invalidate(row_id, self.timestamps.next()).await;
            }
            Strategy::None => {}
        }

        self.tables.bump(&table, self.timestamps.next()).await;

        let mut txns = self.txns.lock().await;
        let state = txns
            .get_mut(&txn_id)
            .ok_or(CacheError::UnknownTransaction { txn_id })?;
        if locked {
            state.locks.push(key.clone());
        }
        if let Some(violation) = violation {
            state.violation.get_or_insert(violation);
        }
        state.pending.push(PendingWrite {
            key: key.clone(),
            table,
            value: new_value,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Query read path
    // ------------------------------------------------------------------

    /// Probe the query-result cache; a stale or unknown fingerprint is a
    /// miss and the caller re-executes.
    pub async fn lookup_query(&self, fingerprint: &QueryFingerprint) -> Option<Vec<Uuid>> {
        if self.is_closed() {
            return None;
        }
        self.queries.lookup(fingerprint, &self.tables).await
    }

    /// Record a freshly executed query result against the tables it read.
    pub async fn on_query_executed(
        &self,
        fingerprint: QueryFingerprint,
        tables: Vec<TableName>,
        row_ids: Vec<Uuid>,
    ) -> CacheResult<()> {
        self.ensure_open()?;
        let executed_at = self.timestamps.next();
        self.queries
            .store(fingerprint, row_ids, tables, executed_at)
            .await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Administration
    // ------------------------------------------------------------------

    /// Empty every region and the query-result cache. Table timestamps
    /// survive so freshness judgements stay monotone.
    pub async fn evict_all(&self) -> CacheResult<()> {
        self.ensure_open()?;
        let regions = self.regions.read().await;
        for region in regions.values() {
            region.evict_all().await;
        }
        drop(regions);
        self.queries.evict_all().await;
        tracing::info!("evicted all cache contents");
        Ok(())
    }

    /// Empty one region; `name` may be a region that was never touched.
    pub async fn evict_region(&self, name: &RegionName) -> CacheResult<()> {
        self.ensure_open()?;
        if let Some(region) = self.regions.read().await.get(name) {
            region.evict_all().await;
        }
        Ok(())
    }

    // ------------------------------------------------------------------

    fn ensure_open(&self) -> CacheResult<()> {
        if self.is_closed() {
            Err(CacheError::Closed)
        } else {
            Ok(())
        }
    }

    /// Bounded soft-lock acquisition: poll until acquired or the
    /// configured timeout elapses.
    ///
    /// The holder's lease is twice the waiter bound, so a live holder is
    /// never preempted by a waiter that merely reached its own deadline.
    async fn soft_lock_with_wait(
        &self,
        region: &CacheRegion,
        key: &CacheKey,
        txn_id: TxnId,
    ) -> CacheResult<()> {
        let lease = self.config.lock_timeout * 2;
        let started = Instant::now();
        loop {
            let attempt = region
                .try_soft_lock(key.row_id(), txn_id, lease, true)
                .await;
            match attempt {
                LockAttempt::Acquired => return Ok(()),
                LockAttempt::Busy => {
                    let waited = started.elapsed();
                    if waited >= self.config.lock_timeout {
                        tracing::warn!(%key, %txn_id, ?waited, "soft lock wait timed out");
                        return Err(CacheError::LockTimeout {
                            key: key.clone(),
                            waited,
                        });
                    }
                    tokio::time::sleep(self.config.lock_poll_interval).await;
                }
                // lock_absent guarantees a placeholder is created.
                LockAttempt::Absent => unreachable!("placeholder lock requested"),
            }
        }
    }

    async fn release_locks(&self, locks: &[CacheKey], txn_id: TxnId) {
        for key in locks {
            let region = self.region(key.region()).await;
            region.release_lock(key.row_id(), txn_id).await;
        }
    }
}
