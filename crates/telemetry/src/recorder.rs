//! In-process trace recorder.
//!
//! Collects traces from inference runs and exposes them as a
//! [`TraceSource`], which the loop executor diffs per run.

use crate::TelemetryError;
use crate::model::{Span, Trace};
use async_trait::async_trait;
use cadence_core::trace::{TraceRecord, TraceSource};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tokio::sync::RwLock;
use tracing::debug;

/// Traces retained before the oldest completed ones are pruned.
pub const MAX_TRACES: usize = 5_000;

pub struct TraceRecorder {
    /// Most recent last
    traces: RwLock<Vec<Trace>>,
    max_traces: usize,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::with_capacity(MAX_TRACES)
    }

    pub fn with_capacity(max_traces: usize) -> Self {
        Self {
            traces: RwLock::new(Vec::new()),
            max_traces: max_traces.max(1),
        }
    }

    /// Start a new trace and return its id.
    pub async fn start_trace(&self, subject: impl Into<String>) -> String {
        let trace = Trace::new(subject);
        let id = trace.id.clone();
        let mut traces = self.traces.write().await;

        if traces.len() >= self.max_traces {
            // Drop the oldest completed traces first
            let drain_count = (self.max_traces / 10).max(1);
            let mut removed = 0;
            traces.retain(|t| {
                if removed >= drain_count || t.ended_at.is_none() {
                    return true;
                }
                removed += 1;
                false
            });
            debug!(removed, retained = traces.len(), "Pruned completed traces");
        }

        traces.push(trace);
        id
    }

    pub async fn end_trace(&self, trace_id: &str) {
        let mut traces = self.traces.write().await;
        if let Some(trace) = traces.iter_mut().find(|t| t.id == trace_id) {
            trace.end();
        }
    }

    /// Append a completed span to a trace.
    pub async fn record_span(&self, trace_id: &str, span: Span) -> Result<(), TelemetryError> {
        let mut traces = self.traces.write().await;
        let trace = traces
            .iter_mut()
            .find(|t| t.id == trace_id)
            .ok_or_else(|| TelemetryError::UnknownTrace(trace_id.to_string()))?;
        trace.add_span(span);
        Ok(())
    }

    pub async fn get_trace(&self, trace_id: &str) -> Option<Trace> {
        let traces = self.traces.read().await;
        traces.iter().find(|t| t.id == trace_id).cloned()
    }

    /// Most recent first.
    pub async fn recent_traces(&self, limit: usize) -> Vec<Trace> {
        let traces = self.traces.read().await;
        traces.iter().rev().take(limit).cloned().collect()
    }

    pub async fn trace_count(&self) -> usize {
        self.traces.read().await.len()
    }

    /// Drop traces started before `cutoff`. Returns how many were removed.
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut traces = self.traces.write().await;
        let before = traces.len();
        traces.retain(|t| t.started_at >= cutoff);
        before - traces.len()
    }
}

impl Default for TraceRecorder {
    fn default() -> Self {
        Self::new()
    }
}

fn to_record(trace: &Trace) -> TraceRecord {
    TraceRecord {
        id: trace.id.clone(),
        recorded_at: trace.started_at,
        payload: serde_json::to_value(trace).unwrap_or(serde_json::Value::Null),
    }
}

#[async_trait]
impl TraceSource for TraceRecorder {
    async fn trace_ids(&self) -> HashSet<String> {
        self.traces.read().await.iter().map(|t| t.id.clone()).collect()
    }

    async fn traces(&self) -> Vec<TraceRecord> {
        self.traces.read().await.iter().map(to_record).collect()
    }

    async fn traces_since(&self, baseline: &HashSet<String>) -> Vec<TraceRecord> {
        self.traces
            .read()
            .await
            .iter()
            .filter(|t| !baseline.contains(&t.id))
            .map(to_record)
            .collect()
    }
}
