//! Table-level write timestamps for query-cache invalidation.
//!
//! Every flush or commit that touches a table bumps its timestamp here; a
//! cached query result is trusted only while no contributing table has
//! been written after the result was cached.

use std::collections::HashMap;
use stratum_core::{TableName, Timestamp};
use tokio::sync::RwLock;

/// Process-wide `table name -> last-write timestamp` map.
#[derive(Debug, Default)]
pub struct TableTimestamps {
    tables: RwLock<HashMap<TableName, Timestamp>>,
}

impl TableTimestamps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write to a table. Timestamps only move forward; a late
    /// bump with an older timestamp is ignored.
    pub async fn bump(&self, table: &TableName, ts: Timestamp) {
        let mut tables = self.tables.write().await;
        let entry = tables.entry(table.clone()).or_insert(Timestamp::ZERO);
        if ts.is_newer_than(*entry) {
            *entry = ts;
        }
    }

    /// Last write to a table, or [`Timestamp::ZERO`] if never written.
    pub async fn last_write(&self, table: &TableName) -> Timestamp {
        let tables = self.tables.read().await;
        tables.get(table).copied().unwrap_or(Timestamp::ZERO)
    }

    /// The newest write among a set of tables.
    pub async fn newest_of(&self, names: impl IntoIterator<Item = &TableName>) -> Timestamp {
        let tables = self.tables.read().await;
        names
            .into_iter()
            .map(|t| tables.get(t).copied().unwrap_or(Timestamp::ZERO))
            .max()
            .unwrap_or(Timestamp::ZERO)
    }
}
