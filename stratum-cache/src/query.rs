//! Query-result cache: fingerprinted result sets invalidated by table
//! write timestamps.
//!
//! A cached result stores the row ids produced by a query, the tables the
//! query touched, and the timestamp at which it was cached. A lookup is
//! fresh only while none of those tables has been written at or after the
//! caching timestamp; the entity state itself is re-assembled from the
//! entity regions, never stored here.

use std::collections::HashMap;
use std::sync::Arc;

use stratum_core::{QueryFingerprint, TableName, Timestamp};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::stats::StatisticsCollector;
use crate::tables::TableTimestamps;

/// One cached result set.
#[derive(Debug, Clone)]
struct QueryCacheEntry {
    row_ids: Vec<Uuid>,
    tables: Vec<TableName>,
    cached_at: Timestamp,
}

/// Fingerprint-keyed result-set cache.
pub struct QueryResultCache {
    entries: RwLock<HashMap<QueryFingerprint, QueryCacheEntry>>,
    stats: Arc<StatisticsCollector>,
}

impl QueryResultCache {
    pub fn new(stats: Arc<StatisticsCollector>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            stats,
        }
    }

    /// Look up a result set, checking freshness against `tables`.
    ///
    /// A stale entry (some touched table written at or after `cached_at`)
    /// counts as a miss and is evicted in place.
    pub async fn lookup(
        &self,
        fingerprint: &QueryFingerprint,
        tables: &TableTimestamps,
    ) -> Option<Vec<Uuid>> {
        let entries = self.entries.read().await;
        let mut fresh = None;
        let mut stale_at = None;
        if let Some(entry) = entries.get(fingerprint) {
            let newest_write = tables.newest_of(entry.tables.iter()).await;
            if newest_write.is_at_least(entry.cached_at) {
                tracing::debug!(
                    %fingerprint,
                    cached_at = %entry.cached_at,
                    %newest_write,
                    "cached query result is stale"
                );
                stale_at = Some(entry.cached_at);
            } else {
                fresh = Some(entry.row_ids.clone());
            }
        }
        drop(entries);

        match fresh {
            Some(row_ids) => {
                self.stats.record_query_hit();
                Some(row_ids)
            }
            None => {
                if let Some(seen_cached_at) = stale_at {
                    self.evict_stale(fingerprint, seen_cached_at).await;
                }
                self.stats.record_query_miss();
                None
            }
        }
    }

    /// Remove the entry judged stale by a lookup, unless a store replaced
    /// it while the lookup held no lock. The caching timestamp identifies
    /// the exact entry the lookup saw.
    async fn evict_stale(&self, fingerprint: &QueryFingerprint, seen_cached_at: Timestamp) {
        let mut entries = self.entries.write().await;
        let unchanged = entries
            .get(fingerprint)
            .is_some_and(|entry| entry.cached_at == seen_cached_at);
        if unchanged {
            entries.remove(fingerprint);
        }
    }

    /// Store a result set produced at `executed_at` against the tables it
    /// read. Replaces any previous entry for the fingerprint.
    pub async fn store(
        &self,
        fingerprint: QueryFingerprint,
        row_ids: Vec<Uuid>,
        tables: Vec<TableName>,
        executed_at: Timestamp,
    ) {
        let mut entries = self.entries.write().await;
        entries.insert(
            fingerprint,
            QueryCacheEntry {
                row_ids,
                tables,
                cached_at: executed_at,
            },
        );
    }

    pub async fn evict_all(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
