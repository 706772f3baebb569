//! Uncached-entity scenarios: a region with no caching strategy never
//! stores or serves anything, so every session pays a store round-trip
//! per row. The query-result cache still works, but a hit on it only
//! saves the query execution, not the row loads.

use std::sync::Arc;
use stratum_core::{CacheConfig, RegionName, Strategy, TableName};
use stratum_test_utils::{Engine, StatProbe};

const QUERY: &str = "select e from NoCacheEntity e";

fn engine() -> Engine {
    Engine::new(CacheConfig::new().with_region("nocache", Strategy::None))
}

fn region() -> RegionName {
    RegionName::new("nocache")
}

fn table() -> TableName {
    TableName::new("nocache_entities")
}

#[tokio::test]
async fn test_query_cache_hit_still_loads_every_row_from_the_store() {
    let engine = engine();
    engine.seed(&table(), 90).await;
    let mut probe = StatProbe::new(engine.stats());

    // First session executes the query; the result-set fingerprint is
    // cached, the entities are not.
    let em1 = engine.open_session().await.unwrap();
    let loaded = em1.find_all(&region(), &table(), QUERY).await.unwrap();
    assert_eq!(loaded.len(), 90);
    probe.assert_delta(1, 0, 0, 0);
    em1.close().await.unwrap();

    // Second session gets the id list from the query cache, then loads
    // all 90 rows one by one; there is no second level to answer.
    let em2 = engine.open_session().await.unwrap();
    let reloaded = em2.find_all(&region(), &table(), QUERY).await.unwrap();
    assert_eq!(reloaded.len(), 90);
    probe.assert_delta(90, 1, 0, 0);
    em2.close().await.unwrap();
}

#[tokio::test]
async fn test_second_level_stays_empty_without_a_strategy() {
    let engine = engine();
    let ids = engine.seed(&table(), 90).await;

    let em1 = engine.open_session().await.unwrap();
    let first = em1.find_all(&region(), &table(), QUERY).await.unwrap();

    let em2 = engine.open_session().await.unwrap();
    let second = em2.find_all(&region(), &table(), QUERY).await.unwrap();

    // No hits, no puts, across both sessions.
    let snapshot = engine.stats().snapshot();
    assert_eq!(snapshot.second_level_hit, 0);
    assert_eq!(snapshot.second_level_put, 0);

    // Same rows, distinct instances; nothing was shared between them.
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert!(!Arc::ptr_eq(a, b));
    }

    // A point lookup goes to the store too, and the region is empty.
    let mut probe = StatProbe::new(engine.stats());
    let em3 = engine.open_session().await.unwrap();
    em3.find(&region(), &table(), ids[0]).await.unwrap().unwrap();
    probe.assert_delta(1, 0, 0, 0);
    assert!(engine.manager().region(&region()).await.is_empty().await);

    em1.close().await.unwrap();
    em2.close().await.unwrap();
    em3.close().await.unwrap();
}
