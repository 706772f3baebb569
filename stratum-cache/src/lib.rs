//! # STRATUM Cache
//!
//! The second-level cache proper: entity regions with pluggable
//! concurrency strategies, the query-result cache keyed by table write
//! timestamps, per-session first-level identity maps, the statistics
//! collector, and the [`CacheManager`] that ties them together behind
//! the notifications a persistence engine drives it with.
//!
//! Shared-state primitives come from `stratum-core`; this crate adds the
//! async machinery on top of `tokio::sync` locks.

pub mod manager;
pub mod query;
pub mod region;
pub mod session;
pub mod source;
pub mod stats;
pub mod tables;

pub use manager::CacheManager;
pub use query::QueryResultCache;
pub use region::{CacheRegion, LockAttempt};
pub use session::SessionContext;
pub use source::{EntitySource, SourceRow};
pub use stats::{StatisticsCollector, StatsDelta, StatsSnapshot};
pub use tables::TableTimestamps;
