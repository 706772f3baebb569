//! Region-scoped cache keys and the name newtypes around them.
//!
//! A [`CacheKey`] can only be constructed with its region name, so a key
//! from one region can never address an entry in another; the scoping is
//! structural, not a runtime check.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of an in-flight transaction, assigned by the persistence engine.
pub type TxnId = Uuid;

/// Identifier of a session (first-level cache owner).
pub type SessionId = Uuid;

/// Name of a cache region (one per entity type or query space).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionName(String);

impl RegionName {
    pub fn new(name: impl Into<String>) -> Self {
        RegionName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RegionName {
    fn from(s: &str) -> Self {
        RegionName::new(s)
    }
}

impl From<String> for RegionName {
    fn from(s: String) -> Self {
        RegionName::new(s)
    }
}

/// Name of a source table, the granularity of query-cache invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName(String);

impl TableName {
    pub fn new(name: impl Into<String>) -> Self {
        TableName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TableName {
    fn from(s: &str) -> Self {
        TableName::new(s)
    }
}

/// Canonical identifier for a query plus its bound parameters.
///
/// The persistence engine is responsible for canonicalization; two
/// fingerprints are the same query space iff they are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryFingerprint(String);

impl QueryFingerprint {
    pub fn new(fingerprint: impl Into<String>) -> Self {
        QueryFingerprint(fingerprint.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueryFingerprint {
    fn from(s: &str) -> Self {
        QueryFingerprint::new(s)
    }
}

/// A cache key scoped to one region.
///
/// The private inner struct ensures a `CacheKey` can ONLY be built via
/// [`CacheKey::new`] with an explicit region, so keys are unique per
/// region by construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    inner: KeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct KeyInner {
    region: RegionName,
    row_id: Uuid,
}

impl CacheKey {
    /// Create a key for one row (or query-result member) in a region.
    pub fn new(region: RegionName, row_id: Uuid) -> Self {
        Self {
            inner: KeyInner { region, row_id },
        }
    }

    /// The region this key is scoped to.
    pub fn region(&self) -> &RegionName {
        &self.inner.region
    }

    /// The row identity within the region.
    pub fn row_id(&self) -> Uuid {
        self.inner.row_id
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.inner.region, self.inner.row_id)
    }
}
