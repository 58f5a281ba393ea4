//! Loop registry — CRUD over [`LoopDefinition`] records.
//!
//! Every definition is a JSON value under `loop:def:{id}`; the id set
//! `loop:index` enumerates them. Writes validate the schedule first, so an
//! invalid expression never touches the store.
//!
//! `last_run_at` lives apart under `loop:last_run:{id}` and is merged in on
//! read. Recording a run never rewrites the definition, so a concurrent
//! pause or edit cannot be undone by it, and an edit cannot roll the last
//! run back.

use crate::cron::CronSchedule;
use crate::error::{LoopError, Result};
use crate::keys;
use crate::model::LoopDefinition;
use cadence_core::store::KvStore;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct LoopRegistry {
    store: Arc<dyn KvStore>,
}

impl LoopRegistry {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Create or replace a loop.
    ///
    /// An existing record keeps its `created_at` and `last_run_at`;
    /// `updated_at` is always refreshed.
    pub async fn upsert_loop(
        &self,
        id: &str,
        schedule: &str,
        prompt: &str,
        enabled: bool,
    ) -> Result<LoopDefinition> {
        validate_id(id)?;
        let now = Utc::now();
        validate_schedule(schedule, now)?;

        let existing = self.get_loop(id).await?;
        let def = LoopDefinition {
            id: id.to_string(),
            schedule: schedule.trim().to_string(),
            prompt: prompt.to_string(),
            enabled,
            created_at: existing.as_ref().map_or(now, |e| e.created_at),
            updated_at: refreshed(existing.as_ref(), now),
            last_run_at: existing.as_ref().and_then(|e| e.last_run_at),
        };

        self.write(&def).await?;
        self.store.sadd(keys::LOOP_INDEX, id).await?;

        info!(
            loop_id = %id,
            schedule = %def.schedule,
            enabled,
            created = existing.is_none(),
            "Loop upserted"
        );
        Ok(def)
    }

    pub async fn get_loop(&self, id: &str) -> Result<Option<LoopDefinition>> {
        let Some(mut def) = self.read_definition(id).await? else {
            return Ok(None);
        };
        let recorded = self.read_last_run(id).await?;
        def.last_run_at = def.last_run_at.max(recorded);
        Ok(Some(def))
    }

    async fn read_definition(&self, id: &str) -> Result<Option<LoopDefinition>> {
        let key = keys::loop_def(id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| LoopError::Corrupt {
                key,
                reason: e.to_string(),
            })
    }

    async fn read_last_run(&self, id: &str) -> Result<Option<DateTime<Utc>>> {
        let key = keys::loop_last_run(id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| LoopError::Corrupt {
                key,
                reason: e.to_string(),
            })
    }

    /// Every registered loop, ordered by id. Index entries whose record is
    /// gone are skipped.
    pub async fn list_loops(&self) -> Result<Vec<LoopDefinition>> {
        let ids = self.store.smembers(keys::LOOP_INDEX).await?;
        let mut loops = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_loop(&id).await? {
                Some(def) => loops.push(def),
                None => debug!(loop_id = %id, "Index entry without definition, skipping"),
            }
        }
        Ok(loops)
    }

    /// The enabled subset of [`list_loops`](Self::list_loops).
    pub async fn list_enabled(&self) -> Result<Vec<LoopDefinition>> {
        Ok(self
            .list_loops()
            .await?
            .into_iter()
            .filter(|l| l.enabled)
            .collect())
    }

    /// Remove a loop. Returns whether anything was removed.
    pub async fn delete_loop(&self, id: &str) -> Result<bool> {
        let indexed = self.store.srem(keys::LOOP_INDEX, id).await?;
        let stored = self.store.del(&keys::loop_def(id)).await?;
        self.store.del(&keys::loop_last_run(id)).await?;
        if indexed || stored {
            info!(loop_id = %id, "Loop deleted");
        }
        Ok(indexed || stored)
    }

    /// Pause or resume without touching schedule or prompt.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<LoopDefinition> {
        let mut def = self
            .get_loop(id)
            .await?
            .ok_or_else(|| LoopError::NotFound(id.to_string()))?;
        def.enabled = enabled;
        def.updated_at = refreshed(Some(&def), Utc::now());
        self.write(&def).await?;
        info!(loop_id = %id, enabled, "Loop toggled");
        Ok(def)
    }

    /// Record the start of a run. A loop deleted in the meantime is not
    /// recreated; returns whether the record was updated.
    pub async fn record_run(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        if self.read_definition(id).await?.is_none() {
            warn!(loop_id = %id, "Run recorded for a deleted loop, ignoring");
            return Ok(false);
        }
        self.store
            .set(&keys::loop_last_run(id), &at.to_rfc3339())
            .await?;
        Ok(true)
    }

    async fn write(&self, def: &LoopDefinition) -> Result<()> {
        let json = serde_json::to_string(def)?;
        self.store.set(&keys::loop_def(&def.id), &json).await?;
        Ok(())
    }
}

/// Ids become store keys and artifact file names, so they are limited to
/// ASCII letters, digits, `-`, `_` and `.`.
fn validate_id(id: &str) -> Result<()> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.');
    if id.is_empty() || !id.chars().all(allowed) {
        return Err(LoopError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Parse `schedule` and confirm it fires at least once after `now`.
pub fn validate_schedule(schedule: &str, now: DateTime<Utc>) -> Result<CronSchedule> {
    let parsed = CronSchedule::parse(schedule)?;
    if parsed.next_after(now).is_none() {
        return Err(LoopError::NeverFires(schedule.to_string()));
    }
    Ok(parsed)
}

/// `now`, nudged forward if the clock has not moved past the previous write.
fn refreshed(previous: Option<&LoopDefinition>, now: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(p) if p.updated_at >= now => p.updated_at + Duration::microseconds(1),
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cadence_core::error::StoreError;
    use cadence_store::InMemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration as StdDuration;

    fn registry() -> (LoopRegistry, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (LoopRegistry::new(store.clone()), store)
    }

    #[tokio::test]
    async fn upsert_and_get() {
        let (registry, _) = registry();
        let def = registry
            .upsert_loop("digest", "0 8 * * *", "Summarize", true)
            .await
            .unwrap();
        assert_eq!(def.created_at, def.updated_at);
        assert!(def.last_run_at.is_none());

        let fetched = registry.get_loop("digest").await.unwrap().unwrap();
        assert_eq!(fetched, def);
    }

    #[tokio::test]
    async fn invalid_schedule_writes_nothing() {
        let (registry, store) = registry();
        for bad in ["not cron", "61 * * * *", "0 0 30 2 *"] {
            assert!(registry.upsert_loop("bad", bad, "p", true).await.is_err());
        }
        assert!(store.is_empty().await);
        assert!(store.smembers(keys::LOOP_INDEX).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_schedule_keeps_previous_record() {
        let (registry, _) = registry();
        let original = registry
            .upsert_loop("digest", "0 8 * * *", "Summarize", true)
            .await
            .unwrap();
        assert!(registry
            .upsert_loop("digest", "garbage", "Changed", true)
            .await
            .is_err());
        assert_eq!(registry.get_loop("digest").await.unwrap().unwrap(), original);
    }

    #[tokio::test]
    async fn reupsert_preserves_created_and_last_run() {
        let (registry, _) = registry();
        let first = registry
            .upsert_loop("digest", "0 8 * * *", "Summarize", true)
            .await
            .unwrap();
        let ran_at = Utc::now();
        assert!(registry.record_run("digest", ran_at).await.unwrap());

        let second = registry
            .upsert_loop("digest", "0 9 * * *", "Summarize better", false)
            .await
            .unwrap();

        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.last_run_at, Some(ran_at));
        assert!(second.updated_at > first.updated_at);
        assert_eq!(second.schedule, "0 9 * * *");
        assert!(!second.enabled);
    }

    #[tokio::test]
    async fn list_is_sorted_and_filters_enabled() {
        let (registry, _) = registry();
        registry.upsert_loop("b", "* * * * *", "p", true).await.unwrap();
        registry.upsert_loop("a", "* * * * *", "p", false).await.unwrap();
        registry.upsert_loop("c", "* * * * *", "p", true).await.unwrap();

        let ids: Vec<String> = registry
            .list_loops()
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let enabled: Vec<String> = registry
            .list_enabled()
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.id)
            .collect();
        assert_eq!(enabled, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn delete_reports_whether_removed() {
        let (registry, store) = registry();
        registry.upsert_loop("a", "* * * * *", "p", true).await.unwrap();

        assert!(registry.delete_loop("a").await.unwrap());
        assert!(!registry.delete_loop("a").await.unwrap());
        assert!(registry.get_loop("a").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn set_enabled_toggles_only_enabled() {
        let (registry, _) = registry();
        let def = registry.upsert_loop("a", "*/5 * * * *", "p", true).await.unwrap();

        let paused = registry.set_enabled("a", false).await.unwrap();
        assert!(!paused.enabled);
        assert_eq!(paused.schedule, def.schedule);
        assert_eq!(paused.created_at, def.created_at);

        assert!(matches!(
            registry.set_enabled("ghost", true).await,
            Err(LoopError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn record_run_does_not_resurrect() {
        let (registry, store) = registry();
        assert!(!registry.record_run("ghost", Utc::now()).await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn rejects_blank_ids() {
        let (registry, _) = registry();
        assert!(matches!(
            registry.upsert_loop("has space", "* * * * *", "p", true).await,
            Err(LoopError::InvalidId(_))
        ));
        assert!(registry.upsert_loop("", "* * * * *", "p", true).await.is_err());
    }

    #[tokio::test]
    async fn rejects_ids_that_would_share_an_artifact_file() {
        let (registry, store) = registry();
        for bad in ["a/b", "a:b", "a*b", "ünïcode"] {
            assert!(
                matches!(
                    registry.upsert_loop(bad, "* * * * *", "p", true).await,
                    Err(LoopError::InvalidId(_))
                ),
                "accepted: {bad:?}"
            );
        }
        assert!(store.is_empty().await);
        registry
            .upsert_loop("a_b.v2-x", "* * * * *", "p", true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delete_removes_last_run() {
        let (registry, store) = registry();
        registry.upsert_loop("a", "* * * * *", "p", true).await.unwrap();
        registry.record_run("a", Utc::now()).await.unwrap();

        assert!(registry.delete_loop("a").await.unwrap());
        assert!(store.is_empty().await);
    }

    /// Holds the first read of a loop definition until `delay` elapses.
    struct SlowFirstDefinitionRead {
        inner: InMemoryStore,
        armed: AtomicBool,
        delay: StdDuration,
    }

    impl SlowFirstDefinitionRead {
        fn new(delay: StdDuration) -> Self {
            Self {
                inner: InMemoryStore::new(),
                armed: AtomicBool::new(false),
                delay,
            }
        }

        fn arm(&self) {
            self.armed.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl KvStore for SlowFirstDefinitionRead {
        fn name(&self) -> &str {
            "slow_first_read"
        }

        async fn get(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
            let value = self.inner.get(key).await?;
            if key.starts_with(&keys::loop_def("")) && self.armed.swap(false, Ordering::SeqCst) {
                tokio::time::sleep(self.delay).await;
            }
            Ok(value)
        }

        async fn set(&self, key: &str, value: &str) -> std::result::Result<(), StoreError> {
            self.inner.set(key, value).await
        }

        async fn del(&self, key: &str) -> std::result::Result<bool, StoreError> {
            self.inner.del(key).await
        }

        async fn sadd(&self, key: &str, member: &str) -> std::result::Result<bool, StoreError> {
            self.inner.sadd(key, member).await
        }

        async fn srem(&self, key: &str, member: &str) -> std::result::Result<bool, StoreError> {
            self.inner.srem(key, member).await
        }

        async fn smembers(&self, key: &str) -> std::result::Result<Vec<String>, StoreError> {
            self.inner.smembers(key).await
        }

        async fn zadd(
            &self,
            key: &str,
            score: f64,
            member: &str,
        ) -> std::result::Result<(), StoreError> {
            self.inner.zadd(key, score, member).await
        }

        async fn zrange_by_score(
            &self,
            key: &str,
            min: f64,
            max: f64,
        ) -> std::result::Result<Vec<String>, StoreError> {
            self.inner.zrange_by_score(key, min, max).await
        }

        async fn zrem(&self, key: &str, member: &str) -> std::result::Result<bool, StoreError> {
            self.inner.zrem(key, member).await
        }

        async fn keys(&self, pattern: &str) -> std::result::Result<Vec<String>, StoreError> {
            self.inner.keys(pattern).await
        }

        async fn set_if_absent(
            &self,
            key: &str,
            value: &str,
            ttl: StdDuration,
        ) -> std::result::Result<bool, StoreError> {
            self.inner.set_if_absent(key, value, ttl).await
        }

        async fn expire_if_equals(
            &self,
            key: &str,
            value: &str,
            ttl: StdDuration,
        ) -> std::result::Result<bool, StoreError> {
            self.inner.expire_if_equals(key, value, ttl).await
        }

        async fn del_if_equals(
            &self,
            key: &str,
            value: &str,
        ) -> std::result::Result<bool, StoreError> {
            self.inner.del_if_equals(key, value).await
        }
    }

    #[tokio::test]
    async fn slow_record_run_does_not_undo_pause() {
        let store = Arc::new(SlowFirstDefinitionRead::new(StdDuration::from_millis(100)));
        let registry = Arc::new(LoopRegistry::new(store.clone()));
        registry.upsert_loop("a", "* * * * *", "p", true).await.unwrap();

        store.arm();
        let ran_at = Utc::now();
        let recorder = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.record_run("a", ran_at).await })
        };
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        registry.set_enabled("a", false).await.unwrap();
        assert!(recorder.await.unwrap().unwrap());

        let def = registry.get_loop("a").await.unwrap().unwrap();
        assert!(!def.enabled);
        assert_eq!(def.last_run_at, Some(ran_at));
    }

    #[tokio::test]
    async fn slow_upsert_does_not_roll_back_last_run() {
        let store = Arc::new(SlowFirstDefinitionRead::new(StdDuration::from_millis(100)));
        let registry = Arc::new(LoopRegistry::new(store.clone()));
        registry.upsert_loop("a", "* * * * *", "p", true).await.unwrap();

        store.arm();
        let editor = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.upsert_loop("a", "0 * * * *", "q", true).await })
        };
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        let ran_at = Utc::now();
        assert!(registry.record_run("a", ran_at).await.unwrap());
        editor.await.unwrap().unwrap();

        let def = registry.get_loop("a").await.unwrap().unwrap();
        assert_eq!(def.schedule, "0 * * * *");
        assert_eq!(def.last_run_at, Some(ran_at));
    }
}
