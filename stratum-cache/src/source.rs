//! Source-of-truth abstraction the cache falls back to on a miss.

use async_trait::async_trait;
use serde_json::Value;
use stratum_core::{CacheResult, TableName};
use uuid::Uuid;

/// A row as the backing store hands it out: its id plus disassembled state.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    pub row_id: Uuid,
    pub state: Value,
}

impl SourceRow {
    pub fn new(row_id: Uuid, state: Value) -> Self {
        Self { row_id, state }
    }
}

/// Backing store for entity state.
///
/// The cache layer treats this as the single source of truth: every miss
/// bottoms out here, and every call is counted as one executed statement
/// by the layer above.
#[async_trait]
pub trait EntitySource: Send + Sync {
    /// Fetch one row by id. `Ok(None)` means the row does not exist;
    /// errors are reserved for the store itself failing.
    async fn fetch(&self, table: &TableName, row_id: Uuid) -> CacheResult<Option<SourceRow>>;

    /// Fetch every row of a table, in the store's scan order.
    async fn fetch_all(&self, table: &TableName) -> CacheResult<Vec<SourceRow>>;
}
