//! Trace source seam.
//!
//! Trace records are opaque to the loop executor: it snapshots the ids
//! present before a run and keeps whatever appeared by the end.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// An opaque trace record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub id: String,
    pub recorded_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Anything that accumulates trace records during model invocations.
#[async_trait]
pub trait TraceSource: Send + Sync {
    /// Ids of every record currently held.
    async fn trace_ids(&self) -> HashSet<String>;

    /// Every record currently held, oldest first.
    async fn traces(&self) -> Vec<TraceRecord>;

    /// Records whose id is not in `baseline`, oldest first.
    async fn traces_since(&self, baseline: &HashSet<String>) -> Vec<TraceRecord> {
        self.traces()
            .await
            .into_iter()
            .filter(|t| !baseline.contains(&t.id))
            .collect()
    }
}

/// A source that never records anything.
pub struct NoopTraceSource;

#[async_trait]
impl TraceSource for NoopTraceSource {
    async fn trace_ids(&self) -> HashSet<String> {
        HashSet::new()
    }

    async fn traces(&self) -> Vec<TraceRecord> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::RwLock;

    struct VecSource(RwLock<Vec<TraceRecord>>);

    #[async_trait]
    impl TraceSource for VecSource {
        async fn trace_ids(&self) -> HashSet<String> {
            self.0.read().await.iter().map(|t| t.id.clone()).collect()
        }
        async fn traces(&self) -> Vec<TraceRecord> {
            self.0.read().await.clone()
        }
    }

    fn record(id: &str) -> TraceRecord {
        TraceRecord {
            id: id.into(),
            recorded_at: Utc::now(),
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn traces_since_returns_only_new_records() {
        let source = VecSource(RwLock::new(vec![record("a"), record("b")]));
        let baseline = source.trace_ids().await;
        source.0.write().await.push(record("c"));

        let diff = source.traces_since(&baseline).await;
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].id, "c");
    }

    #[tokio::test]
    async fn noop_source_is_empty() {
        assert!(NoopTraceSource.traces().await.is_empty());
    }
}
