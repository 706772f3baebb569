//! STRATUM Core - Shared types for the second-level cache subsystem
//!
//! Leaf types with no runtime machinery: logical timestamps, scoped cache
//! keys, soft-lock state, concurrency strategy configuration, and error
//! enums. The cache itself lives in `stratum-cache`.

pub mod config;
pub mod error;
pub mod key;
pub mod lock;
pub mod timestamp;

pub use config::{CacheConfig, Strategy, VisibilityRule};
pub use error::{CacheError, CacheResult};
pub use key::{CacheKey, QueryFingerprint, RegionName, SessionId, TableName, TxnId};
pub use lock::{LockState, SoftLock};
pub use timestamp::{Timestamp, TimestampSource};
