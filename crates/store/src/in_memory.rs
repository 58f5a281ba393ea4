//! In-memory backend — useful for testing and ephemeral runs.

use async_trait::async_trait;
use cadence_core::error::StoreError;
use cadence_core::store::KvStore;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Value {
    data: String,
    expires_at: Option<Instant>,
}

impl Value {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Default)]
struct Inner {
    values: HashMap<String, Value>,
    sets: HashMap<String, BTreeSet<String>>,
    zsets: HashMap<String, HashMap<String, f64>>,
}

/// A store that keeps everything in process memory.
/// Nothing survives a restart.
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// Number of live plain keys (test convenience).
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let inner = self.inner.read().await;
        inner.values.values().filter(|v| v.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let inner = self.inner.read().await;
        Ok(inner
            .values
            .get(key)
            .filter(|v| v.is_live(now))
            .map(|v| v.data.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.write().await.values.insert(
            key.to_string(),
            Value {
                data: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let removed = self.inner.write().await.values.remove(key);
        Ok(removed.is_some_and(|v| v.is_live(now)))
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(set) = inner.sets.get_mut(key) else {
            return Ok(false);
        };
        let removed = set.remove(member);
        if set.is_empty() {
            inner.sets.remove(key);
        }
        Ok(removed)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.read().await;
        let Some(zset) = inner.zsets.get(key) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<(&String, f64)> = zset
            .iter()
            .filter(|(_, score)| **score >= min && **score <= max)
            .map(|(m, s)| (m, *s))
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        Ok(hits.into_iter().map(|(m, _)| m.clone()).collect())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(zset) = inner.zsets.get_mut(key) else {
            return Ok(false);
        };
        let removed = zset.remove(member).is_some();
        if zset.is_empty() {
            inner.zsets.remove(key);
        }
        Ok(removed)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let matcher = glob::Pattern::new(pattern).map_err(|e| StoreError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        let now = Instant::now();
        let inner = self.inner.read().await;
        let mut keys: Vec<String> = inner
            .values
            .iter()
            .filter(|(k, v)| v.is_live(now) && matcher.matches(k))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        if inner.values.get(key).is_some_and(|v| v.is_live(now)) {
            return Ok(false);
        }
        inner.values.insert(
            key.to_string(),
            Value {
                data: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn expire_if_equals(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        match inner.values.get_mut(key) {
            Some(v) if v.is_live(now) && v.data == value => {
                v.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn del_if_equals(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        let owned = inner
            .values
            .get(key)
            .is_some_and(|v| v.is_live(now) && v.data == value);
        if owned {
            inner.values.remove(key);
        }
        Ok(owned)
    }
}
