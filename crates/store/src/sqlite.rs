//! SQLite backend.
//!
//! Uses a single SQLite database file with three tables:
//! - `kv` — plain keys, with an optional expiry for leases
//! - `kv_sets` — unordered set members
//! - `kv_zsets` — score-ordered set members
//!
//! Lease operations are single statements so they stay atomic across
//! connections and across processes sharing the file.

use async_trait::async_trait;
use cadence_core::error::StoreError;
use cadence_core::store::KvStore;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// A durable SQLite key-value backend.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store from a path or URL.
    ///
    /// The database and all tables/indexes are created automatically.
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Unavailable(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        // Every connection to ":memory:" is its own database, so pin one.
        let in_memory = path.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 4 })
            .idle_timeout(if in_memory { None } else { Some(Duration::from_secs(600)) })
            .max_lifetime(if in_memory { None } else { Some(Duration::from_secs(1800)) })
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Close every pooled connection, flushing the WAL.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key           TEXT PRIMARY KEY NOT NULL,
                value         TEXT NOT NULL,
                expires_at_ms INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("kv table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_sets (
                key    TEXT NOT NULL,
                member TEXT NOT NULL,
                PRIMARY KEY (key, member)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("kv_sets table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_zsets (
                key    TEXT NOT NULL,
                member TEXT NOT NULL,
                score  REAL NOT NULL,
                PRIMARY KEY (key, member)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("kv_zsets table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_kv_zsets_score ON kv_zsets(key, score)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("score index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn expiry_ms(ttl: Duration) -> i64 {
        Self::now_ms().saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
    }

    /// SQLite REAL has no portable infinity literal; clamp open bounds.
    fn finite(score: f64) -> f64 {
        score.clamp(f64::MIN, f64::MAX)
    }

    fn query_failed(op: &str, e: sqlx::Error) -> StoreError {
        StoreError::QueryFailed(format!("{op}: {e}"))
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query(
            "SELECT value FROM kv WHERE key = ?1 AND (expires_at_ms IS NULL OR expires_at_ms > ?2)",
        )
        .bind(key)
        .bind(Self::now_ms())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Self::query_failed("GET", e))?;

        row.map(|r| r.try_get::<String, _>("value"))
            .transpose()
            .map_err(|e| Self::query_failed("GET value column", e))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO kv (key, value, expires_at_ms) VALUES (?1, ?2, NULL)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at_ms = NULL
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::query_failed("SET", e))?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let live = sqlx::query(
            "DELETE FROM kv WHERE key = ?1 AND (expires_at_ms IS NULL OR expires_at_ms > ?2)",
        )
        .bind(key)
        .bind(Self::now_ms())
        .execute(&self.pool)
        .await
        .map_err(|e| Self::query_failed("DEL", e))?
        .rows_affected();

        // Drop any expired leftover under the same key.
        sqlx::query("DELETE FROM kv WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| Self::query_failed("DEL expired", e))?;

        Ok(live > 0)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let added = sqlx::query("INSERT OR IGNORE INTO kv_sets (key, member) VALUES (?1, ?2)")
            .bind(key)
            .bind(member)
            .execute(&self.pool)
            .await
            .map_err(|e| Self::query_failed("SADD", e))?
            .rows_affected();
        Ok(added > 0)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let removed = sqlx::query("DELETE FROM kv_sets WHERE key = ?1 AND member = ?2")
            .bind(key)
            .bind(member)
            .execute(&self.pool)
            .await
            .map_err(|e| Self::query_failed("SREM", e))?
            .rows_affected();
        Ok(removed > 0)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT member FROM kv_sets WHERE key = ?1 ORDER BY member")
            .bind(key)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Self::query_failed("SMEMBERS", e))?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("member"))
            .collect::<Result<_, _>>()
            .map_err(|e| Self::query_failed("SMEMBERS member column", e))
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO kv_zsets (key, member, score) VALUES (?1, ?2, ?3)
            ON CONFLICT(key, member) DO UPDATE SET score = excluded.score
            "#,
        )
        .bind(key)
        .bind(member)
        .bind(Self::finite(score))
        .execute(&self.pool)
        .await
        .map_err(|e| Self::query_failed("ZADD", e))?;
        Ok(())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT member FROM kv_zsets
            WHERE key = ?1 AND score >= ?2 AND score <= ?3
            ORDER BY score ASC, member ASC
            "#,
        )
        .bind(key)
        .bind(Self::finite(min))
        .bind(Self::finite(max))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Self::query_failed("ZRANGEBYSCORE", e))?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("member"))
            .collect::<Result<_, _>>()
            .map_err(|e| Self::query_failed("ZRANGEBYSCORE member column", e))
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let removed = sqlx::query("DELETE FROM kv_zsets WHERE key = ?1 AND member = ?2")
            .bind(key)
            .bind(member)
            .execute(&self.pool)
            .await
            .map_err(|e| Self::query_failed("ZREM", e))?
            .rows_affected();
        Ok(removed > 0)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        // SQLite GLOB shares the `*`, `?` and `[...]` syntax.
        let rows = sqlx::query(
            r#"
            SELECT key FROM kv
            WHERE key GLOB ?1 AND (expires_at_ms IS NULL OR expires_at_ms > ?2)
            ORDER BY key
            "#,
        )
        .bind(pattern)
        .bind(Self::now_ms())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Self::query_failed("KEYS", e))?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("key"))
            .collect::<Result<_, _>>()
            .map_err(|e| Self::query_failed("KEYS key column", e))
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        // The upsert only fires over an expired row; a live row makes it a no-op.
        let affected = sqlx::query(
            r#"
            INSERT INTO kv (key, value, expires_at_ms) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at_ms = excluded.expires_at_ms
            WHERE kv.expires_at_ms IS NOT NULL AND kv.expires_at_ms <= ?4
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Self::expiry_ms(ttl))
        .bind(Self::now_ms())
        .execute(&self.pool)
        .await
        .map_err(|e| Self::query_failed("SET NX PX", e))?
        .rows_affected();
        Ok(affected > 0)
    }

    async fn expire_if_equals(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let affected = sqlx::query(
            r#"
            UPDATE kv SET expires_at_ms = ?3
            WHERE key = ?1 AND value = ?2 AND (expires_at_ms IS NULL OR expires_at_ms > ?4)
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Self::expiry_ms(ttl))
        .bind(Self::now_ms())
        .execute(&self.pool)
        .await
        .map_err(|e| Self::query_failed("PEXPIRE if owner", e))?
        .rows_affected();
        Ok(affected > 0)
    }

    async fn del_if_equals(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let affected = sqlx::query(
            r#"
            DELETE FROM kv
            WHERE key = ?1 AND value = ?2 AND (expires_at_ms IS NULL OR expires_at_ms > ?3)
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Self::now_ms())
        .execute(&self.pool)
        .await
        .map_err(|e| Self::query_failed("DEL if owner", e))?
        .rows_affected();
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn set_get_overwrite_del() {
        let store = test_store().await;
        store.set("k", "v1").await.unwrap();
        store.set("k", "v2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));

        assert!(store.del("k").await.unwrap());
        assert!(store.get("k").await.unwrap().is_none());
        assert!(!store.del("k").await.unwrap());
    }

    #[tokio::test]
    async fn set_operations() {
        let store = test_store().await;
        assert!(store.sadd("idx", "b").await.unwrap());
        assert!(store.sadd("idx", "a").await.unwrap());
        assert!(!store.sadd("idx", "a").await.unwrap());
        assert_eq!(store.smembers("idx").await.unwrap(), vec!["a", "b"]);
        assert!(store.srem("idx", "a").await.unwrap());
        assert_eq!(store.smembers("idx").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn sorted_set_range_with_open_bounds() {
        let store = test_store().await;
        store.zadd("t", 1_000.0, "old").await.unwrap();
        store.zadd("t", 5_000.0, "new").await.unwrap();

        let old = store
            .zrange_by_score("t", f64::NEG_INFINITY, 2_000.0)
            .await
            .unwrap();
        assert_eq!(old, vec!["old"]);

        let all = store
            .zrange_by_score("t", f64::NEG_INFINITY, f64::INFINITY)
            .await
            .unwrap();
        assert_eq!(all, vec!["old", "new"]);

        assert!(store.zrem("t", "old").await.unwrap());
        assert_eq!(store.zrange_by_score("t", 0.0, 10_000.0).await.unwrap(), vec!["new"]);
    }

    #[tokio::test]
    async fn keys_uses_glob() {
        let store = test_store().await;
        store.set("cadence:loop:def:a", "{}").await.unwrap();
        store.set("cadence:loop:def:b", "{}").await.unwrap();
        store.set("cadence:loop:exec:a-1", "{}").await.unwrap();
        assert_eq!(
            store.keys("cadence:loop:def:*").await.unwrap(),
            vec!["cadence:loop:def:a", "cadence:loop:def:b"]
        );
    }

    #[tokio::test]
    async fn lease_is_exclusive_until_released() {
        let store = test_store().await;
        let ttl = Duration::from_secs(30);
        assert!(store.set_if_absent("lease", "a", ttl).await.unwrap());
        assert!(!store.set_if_absent("lease", "b", ttl).await.unwrap());
        assert!(store.expire_if_equals("lease", "a", ttl).await.unwrap());
        assert!(!store.expire_if_equals("lease", "b", ttl).await.unwrap());
        assert!(!store.del_if_equals("lease", "b").await.unwrap());
        assert!(store.del_if_equals("lease", "a").await.unwrap());
        assert!(store.set_if_absent("lease", "b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lease_can_be_taken_over() {
        let store = test_store().await;
        assert!(store
            .set_if_absent("lease", "a", Duration::from_millis(1))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.get("lease").await.unwrap().is_none());
        assert!(store
            .set_if_absent("lease", "b", Duration::from_secs(30))
            .await
            .unwrap());
        assert_eq!(store.get("lease").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = format!("sqlite://{}", dir.path().join("cadence.db").display());

        let store = SqliteStore::new(&path).await.unwrap();
        store.set("persisted", "yes").await.unwrap();
        store.zadd("z", 1.0, "m").await.unwrap();
        store.close().await;

        let reopened = SqliteStore::new(&path).await.unwrap();
        assert_eq!(reopened.get("persisted").await.unwrap().as_deref(), Some("yes"));
        assert_eq!(reopened.zrange_by_score("z", 0.0, 2.0).await.unwrap(), vec!["m"]);
    }
}
