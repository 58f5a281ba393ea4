//! Execution sweeper — reclaims execution records past retention.

use crate::error::Result;
use crate::history::ExecutionLogStore;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::io::ErrorKind;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Executions whose records were removed
    pub removed: usize,
    /// Artifact files deleted
    pub files_deleted: usize,
    /// Artifact files that could not be deleted
    pub file_errors: usize,
    /// Executions whose records could not be removed
    pub record_errors: usize,
}

pub struct ExecutionSweeper {
    history: Arc<ExecutionLogStore>,
    retention: Duration,
}

impl ExecutionSweeper {
    pub const DEFAULT_RETENTION_DAYS: i64 = 7;

    pub fn new(history: Arc<ExecutionLogStore>, retention: Duration) -> Self {
        Self { history, retention }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// Remove every execution that started at or before `now - retention`.
    ///
    /// Failures on one execution are logged and the sweep moves on.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let threshold = (now - self.retention).timestamp_millis() as f64;
        let expired = self
            .history
            .ids_between(f64::NEG_INFINITY, threshold)
            .await?;

        let mut report = SweepReport::default();
        for exec_id in expired {
            let log = match self.history.remove(&exec_id).await {
                Ok(log) => log,
                Err(e) => {
                    warn!(execution_id = %exec_id, error = %e, "Failed to remove execution record");
                    report.record_errors += 1;
                    continue;
                }
            };
            report.removed += 1;

            let Some(path) = log.and_then(|l| l.log_file_path) else {
                continue;
            };
            match tokio::fs::remove_file(&path).await {
                Ok(()) => report.files_deleted += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(execution_id = %exec_id, path = %path, "Artifact already gone");
                }
                Err(e) => {
                    warn!(execution_id = %exec_id, path = %path, error = %e, "Failed to delete artifact");
                    report.file_errors += 1;
                }
            }
        }

        if report.removed > 0 {
            info!(
                removed = report.removed,
                files_deleted = report.files_deleted,
                file_errors = report.file_errors,
                "Sweep finished"
            );
        }
        Ok(report)
    }
}
