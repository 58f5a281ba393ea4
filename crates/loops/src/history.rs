//! Execution history — persisted logs and trace snapshots.
//!
//! Each execution owns three entries: the log under `loop:exec:{id}`, its
//! trace snapshot under `loop:trace:{id}`, and a member of the time index
//! `loop:exec:index` scored by start time.

use crate::error::{LoopError, Result};
use crate::keys;
use crate::model::LoopExecutionLog;
use cadence_core::store::KvStore;
use cadence_core::trace::TraceRecord;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::sync::Arc;

pub struct ExecutionLogStore {
    store: Arc<dyn KvStore>,
}

impl ExecutionLogStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Persist a log with its trace snapshot and index it by start time.
    pub async fn save(&self, log: &LoopExecutionLog, traces: &[TraceRecord]) -> Result<()> {
        self.store
            .set(&keys::exec_log(&log.id), &serde_json::to_string(log)?)
            .await?;
        self.store
            .zadd(
                keys::EXEC_INDEX,
                log.started_at.timestamp_millis() as f64,
                &log.id,
            )
            .await?;
        self.store
            .set(&keys::exec_trace(&log.id), &serde_json::to_string(traces)?)
            .await?;
        Ok(())
    }

    pub async fn get(&self, exec_id: &str) -> Result<Option<LoopExecutionLog>> {
        self.read_json(&keys::exec_log(exec_id)).await
    }

    /// The trace snapshot of an execution (empty if none was stored).
    pub async fn traces(&self, exec_id: &str) -> Result<Vec<TraceRecord>> {
        Ok(self
            .read_json(&keys::exec_trace(exec_id))
            .await?
            .unwrap_or_default())
    }

    /// Execution ids started within `[from, to]`, oldest first.
    pub async fn ids_between(&self, from: f64, to: f64) -> Result<Vec<String>> {
        Ok(self.store.zrange_by_score(keys::EXEC_INDEX, from, to).await?)
    }

    /// Logs started within `[from, to]`, oldest first.
    pub async fn list_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LoopExecutionLog>> {
        let ids = self
            .ids_between(from.timestamp_millis() as f64, to.timestamp_millis() as f64)
            .await?;
        let mut logs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(log) = self.get(&id).await? {
                logs.push(log);
            }
        }
        Ok(logs)
    }

    /// Every log of one loop, oldest first.
    pub async fn list_for_loop(&self, loop_id: &str) -> Result<Vec<LoopExecutionLog>> {
        let keys = self.store.keys(&keys::exec_log_pattern(loop_id)).await?;
        let mut logs = Vec::with_capacity(keys.len());
        for key in keys {
            // Ids like "{loop}-x-123" also match "{loop}-*"
            if let Some(log) = self.read_json::<LoopExecutionLog>(&key).await?
                && log.loop_id == loop_id
            {
                logs.push(log);
            }
        }
        logs.sort_by_key(|l| l.started_at);
        Ok(logs)
    }

    /// Delete log, trace snapshot and index entry. Returns the removed log
    /// when one was stored.
    pub async fn remove(&self, exec_id: &str) -> Result<Option<LoopExecutionLog>> {
        let log = match self.get(exec_id).await {
            Ok(log) => log,
            // A corrupt record is still removed
            Err(LoopError::Corrupt { .. }) => None,
            Err(e) => return Err(e),
        };
        self.store.del(&keys::exec_log(exec_id)).await?;
        self.store.del(&keys::exec_trace(exec_id)).await?;
        self.store.zrem(keys::EXEC_INDEX, exec_id).await?;
        Ok(log)
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| LoopError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }
}
