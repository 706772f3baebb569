//! First-level cache: the per-session identity map.
//!
//! A session hands out exactly one shared instance per entity key for its
//! whole lifetime. Repeated loads of the same key return the same
//! `Arc<Value>`; two sessions never share instances. The map answers
//! before any second-level lookup, so re-reading an already-materialized
//! entity touches no cross-session statistics.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use stratum_core::{CacheKey, SessionId};
use tokio::sync::RwLock;

/// Identity map for one session.
pub struct SessionContext {
    id: SessionId,
    instances: RwLock<HashMap<CacheKey, Arc<Value>>>,
}

impl SessionContext {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            instances: RwLock::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The session's instance for `key`, if already materialized.
    pub async fn lookup(&self, key: &CacheKey) -> Option<Arc<Value>> {
        self.instances.read().await.get(key).map(Arc::clone)
    }

    /// Register a materialized instance, returning the canonical one.
    ///
    /// If the key is already mapped the existing instance wins and is
    /// returned; the caller's copy is dropped. This keeps the identity
    /// guarantee even when two code paths materialize the same row.
    pub async fn register(&self, key: CacheKey, value: Value) -> Arc<Value> {
        let mut instances = self.instances.write().await;
        Arc::clone(instances.entry(key).or_insert_with(|| Arc::new(value)))
    }

    /// Forget one instance, forcing the next load to re-materialize.
    pub async fn evict(&self, key: &CacheKey) {
        self.instances.write().await.remove(key);
    }

    /// Forget everything this session has materialized.
    pub async fn clear(&self) {
        self.instances.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instances.read().await.is_empty()
    }
}
