//! # STRATUM Test Utils
//!
//! In-memory persistence harness for exercising the cache subsystem the
//! way an engine drives it: an [`MemoryTableStore`] standing in for the
//! database, an [`Engine`] owning the [`CacheManager`], and
//! [`EngineSession`]s that play the full read path (first-level map, then
//! query cache, then entity regions, then the store) and the write path
//! (buffered writes, flush notifications, commit/rollback).
//!
//! Statement accounting mirrors a real engine: one statement per store
//! round-trip, whether that is a full query execution or a single-row
//! fall-back load.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use stratum_cache::{
    CacheManager, EntitySource, SessionContext, SourceRow, StatisticsCollector, StatsSnapshot,
};
use stratum_core::{
    CacheConfig, CacheError, CacheKey, CacheResult, QueryFingerprint, RegionName, TableName,
    Timestamp, TxnId,
};
use tokio::sync::RwLock;
use uuid::Uuid;

// ============================================================
// In-memory store
// ============================================================

/// Table-per-name row store; the harness's single source of truth.
/// `BTreeMap` keeps scan order deterministic across runs.
pub struct MemoryTableStore {
    tables: RwLock<HashMap<TableName, BTreeMap<Uuid, Value>>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub async fn upsert(&self, table: &TableName, row_id: Uuid, state: Value) {
        let mut tables = self.tables.write().await;
        tables.entry(table.clone()).or_default().insert(row_id, state);
    }

    pub async fn row_count(&self, table: &TableName) -> usize {
        self.tables
            .read()
            .await
            .get(table)
            .map_or(0, BTreeMap::len)
    }
}

impl Default for MemoryTableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntitySource for MemoryTableStore {
    async fn fetch(&self, table: &TableName, row_id: Uuid) -> CacheResult<Option<SourceRow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(table)
            .and_then(|rows| rows.get(&row_id))
            .map(|state| SourceRow::new(row_id, state.clone())))
    }

    async fn fetch_all(&self, table: &TableName) -> CacheResult<Vec<SourceRow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .map(|(id, state)| SourceRow::new(*id, state.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ============================================================
// Engine harness
// ============================================================

/// The engine: one cache manager plus one backing store, shared by every
/// session it opens.
pub struct Engine {
    manager: Arc<CacheManager>,
    store: Arc<MemoryTableStore>,
}

impl Engine {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            manager: Arc::new(CacheManager::open(config)),
            store: Arc::new(MemoryTableStore::new()),
        }
    }

    pub fn manager(&self) -> &CacheManager {
        &self.manager
    }

    pub fn store(&self) -> &MemoryTableStore {
        &self.store
    }

    pub fn stats(&self) -> Arc<StatisticsCollector> {
        self.manager.stats()
    }

    /// Seed `count` rows straight into the store, bypassing the cache and
    /// the statistics. Returns the new row ids in scan order.
    pub async fn seed(&self, table: &TableName, count: usize) -> Vec<Uuid> {
        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            let id = Uuid::now_v7();
            self.store
                .upsert(table, id, json!({ "name": format!("seed-{i}") }))
                .await;
            ids.push(id);
        }
        ids
    }

    /// Open a session with its own identity map and transaction. The
    /// session's cache reads are judged against the timestamp drawn here,
    /// for its whole lifetime.
    pub async fn open_session(&self) -> CacheResult<EngineSession> {
        let txn_id = Uuid::now_v7();
        let start_ts = self.manager.on_transaction_begin(txn_id).await?;
        tracing::debug!(%txn_id, %start_ts, "opened session");
        Ok(EngineSession {
            manager: Arc::clone(&self.manager),
            store: Arc::clone(&self.store),
            context: SessionContext::new(Uuid::now_v7()),
            txn_id,
            start_ts,
            dirty: Vec::new(),
            finished: false,
        })
    }
}

/// One open session: identity map, transaction, and buffered writes.
/// End it with [`commit`](EngineSession::commit),
/// [`rollback`](EngineSession::rollback), or
/// [`close`](EngineSession::close); a session left open keeps its
/// transaction registered with the manager.
pub struct EngineSession {
    manager: Arc<CacheManager>,
    store: Arc<MemoryTableStore>,
    context: SessionContext,
    txn_id: TxnId,
    start_ts: Timestamp,
    dirty: Vec<(CacheKey, TableName, Value)>,
    finished: bool,
}

impl EngineSession {
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    pub fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    /// Run a cacheable query over a whole table.
    ///
    /// Query-cache hit: assemble each row id through the identity map,
    /// the entity regions, and finally single-row store loads. Miss: one
    /// statement re-executes the query, materializes every row, offers
    /// each newly seen row to its region, and stores the id list.
    pub async fn find_all(
        &self,
        region: &RegionName,
        table: &TableName,
        query: &str,
    ) -> CacheResult<Vec<Arc<Value>>> {
        let fingerprint = QueryFingerprint::new(query);

        if let Some(row_ids) = self.manager.lookup_query(&fingerprint).await {
            let mut out = Vec::with_capacity(row_ids.len());
            for row_id in row_ids {
                if let Some(instance) = self.materialize(region, table, row_id).await? {
                    out.push(instance);
                }
            }
            return Ok(out);
        }

        // Re-execution returns full rows, so the whole result set costs
        // one statement.
        self.manager.stats().record_statement();
        let rows = self.store.fetch_all(table).await?;
        let mut out = Vec::with_capacity(rows.len());
        let mut row_ids = Vec::with_capacity(rows.len());
        for row in rows {
            let key = CacheKey::new(region.clone(), row.row_id);
            if self.context.lookup(&key).await.is_none() {
                self.manager
                    .on_entity_load(&key, row.state.clone(), self.start_ts)
                    .await?;
            }
            row_ids.push(row.row_id);
            out.push(self.context.register(key, row.state).await);
        }
        self.manager
            .on_query_executed(fingerprint, vec![table.clone()], row_ids)
            .await?;
        Ok(out)
    }

    /// Load one entity by id through every cache layer.
    pub async fn find(
        &self,
        region: &RegionName,
        table: &TableName,
        row_id: Uuid,
    ) -> CacheResult<Option<Arc<Value>>> {
        self.materialize(region, table, row_id).await
    }

    /// Buffer a write; it reaches the store and the cache at flush.
    /// The instance is registered in the identity map right away, so the
    /// session can resolve what it persisted before any flush.
    pub async fn persist(
        &mut self,
        region: &RegionName,
        table: &TableName,
        row_id: Uuid,
        state: Value,
    ) -> Arc<Value> {
        let key = CacheKey::new(region.clone(), row_id);
        self.dirty.push((key.clone(), table.clone(), state.clone()));
        self.context.register(key, state).await
    }

    /// Push buffered writes to the store and notify the cache, one
    /// statement per write.
    pub async fn flush(&mut self) -> CacheResult<()> {
        for (key, table, value) in std::mem::take(&mut self.dirty) {
            self.manager.stats().record_statement();
            self.store.upsert(&table, key.row_id(), value.clone()).await;
            self.manager
                .on_entity_flush(&key, value, table, self.txn_id)
                .await?;
        }
        Ok(())
    }

    /// Flush outstanding writes, then commit the session's transaction.
    pub async fn commit(&mut self) -> CacheResult<Timestamp> {
        self.flush().await?;
        // The manager removes the transaction even when the commit turns
        // into an abort, so the session is finished either way.
        self.finished = true;
        self.manager.on_transaction_commit(self.txn_id).await
    }

    pub async fn rollback(&mut self) -> CacheResult<()> {
        self.dirty.clear();
        self.finished = true;
        self.manager.on_transaction_rollback(self.txn_id).await
    }

    /// End the session. A transaction still open at this point is rolled
    /// back and its buffered writes are discarded; after a commit or
    /// rollback this is a no-op.
    pub async fn close(mut self) -> CacheResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.dirty.clear();
        match self.manager.on_transaction_rollback(self.txn_id).await {
            Ok(()) | Err(CacheError::UnknownTransaction { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Drop every materialized instance, keeping the session timestamp.
    pub async fn clear(&self) {
        self.context.clear().await;
    }

    async fn materialize(
        &self,
        region: &RegionName,
        table: &TableName,
        row_id: Uuid,
    ) -> CacheResult<Option<Arc<Value>>> {
        let key = CacheKey::new(region.clone(), row_id);
        if let Some(instance) = self.context.lookup(&key).await {
            return Ok(Some(instance));
        }
        if let Some(state) = self
            .manager
            .get_entity(&key, self.start_ts, Some(self.txn_id))
            .await
        {
            return Ok(Some(self.context.register(key, state).await));
        }

        // Fall back to the store, one statement per row.
        self.manager.stats().record_statement();
        match self.store.fetch(table, row_id).await? {
            Some(row) => {
                self.manager
                    .on_entity_load(&key, row.state.clone(), self.start_ts)
                    .await?;
                Ok(Some(self.context.register(key, row.state).await))
            }
            None => Ok(None),
        }
    }
}

// ============================================================
// Statistics probe
// ============================================================

/// Snapshot-delta assertions over the four headline counters, in the
/// fixed order statements / query hits / second-level hits / puts.
pub struct StatProbe {
    stats: Arc<StatisticsCollector>,
    last: StatsSnapshot,
}

impl StatProbe {
    pub fn new(stats: Arc<StatisticsCollector>) -> Self {
        let last = stats.snapshot();
        Self { stats, last }
    }

    /// Assert the counter deltas since the previous call, then advance
    /// the baseline.
    #[track_caller]
    pub fn assert_delta(
        &mut self,
        statements: u64,
        query_hits: u64,
        second_level_hits: u64,
        second_level_puts: u64,
    ) {
        let snapshot = self.stats.snapshot();
        let delta = snapshot.delta_since(&self.last);
        assert_eq!(delta.statements, statements, "statement count delta");
        assert_eq!(delta.query_hits, query_hits, "query cache hit delta");
        assert_eq!(
            delta.second_level_hits, second_level_hits,
            "second-level hit delta"
        );
        assert_eq!(
            delta.second_level_puts, second_level_puts,
            "second-level put delta"
        );
        self.last = snapshot;
    }
}
