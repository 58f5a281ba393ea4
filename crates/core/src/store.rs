//! KvStore trait — the durable time-bucket store behind every persisted record.
//!
//! The operation set mirrors a Redis-style server: plain keys, unordered
//! sets, score-ordered sets and glob key scans. Three extra primitives
//! support TTL-bound ownership leases.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::StoreError;

/// The core KvStore trait.
///
/// Implementations: in-memory (for testing), SQLite.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// GET. Expired values read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// SET (clears any TTL).
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// DEL. Returns whether a live value was removed.
    async fn del(&self, key: &str) -> Result<bool, StoreError>;

    /// SADD. Returns whether the member was newly added.
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// SREM. Returns whether the member was present.
    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// SMEMBERS, sorted for stable iteration.
    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// ZADD. Re-adding a member updates its score.
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), StoreError>;

    /// ZRANGEBYSCORE, inclusive bounds, ascending by score then member.
    async fn zrange_by_score(&self, key: &str, min: f64, max: f64)
    -> Result<Vec<String>, StoreError>;

    /// ZREM. Returns whether the member was present.
    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// KEYS over plain keys, glob syntax (`*`, `?`, `[...]`).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// SET key value NX PX ttl. Returns whether the caller now owns the key.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
    -> Result<bool, StoreError>;

    /// Push the TTL out to `ttl` from now, only while `value` still owns `key`.
    async fn expire_if_equals(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Delete `key` only while `value` still owns it.
    async fn del_if_equals(&self, key: &str, value: &str) -> Result<bool, StoreError>;
}
