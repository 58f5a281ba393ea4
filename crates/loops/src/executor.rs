//! Loop executor — one loop invocation end to end.
//!
//! ```text
//! acquire guard ─▶ record last_run_at ─▶ run model ─▶ diff traces
//!                                                         │
//!            release guard ◀─ persist log + traces ◀─ write artifact
//! ```
//!
//! `last_run_at` is recorded before the model is called so a slow run is
//! never seen as still due by the next tick. The log is written once when
//! the run starts and finalized exactly once when it ends, whatever the
//! outcome.

use crate::error::{LoopError, Result};
use crate::guard::OverlapGuard;
use crate::history::ExecutionLogStore;
use crate::model::{ExecutionStatus, LoopArtifact, LoopDefinition, LoopExecutionLog, preview};
use crate::registry::LoopRegistry;
use cadence_core::error::ProviderError;
use cadence_core::inference::{DrainedResponse, InferenceClient, drain};
use cadence_core::tool::ToolExecutor;
use cadence_core::trace::{TraceRecord, TraceSource};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Prepended to each loop's prompt
    pub base_system_prompt: String,
    /// Directory for per-execution JSON artifacts
    pub artifact_dir: PathBuf,
    pub response_preview_chars: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            base_system_prompt: String::new(),
            artifact_dir: std::env::temp_dir().join("cadence-loop-runs"),
            response_preview_chars: 200,
        }
    }
}

pub struct LoopExecutor {
    registry: Arc<LoopRegistry>,
    history: Arc<ExecutionLogStore>,
    guard: Arc<dyn OverlapGuard>,
    inference: Arc<dyn InferenceClient>,
    tools: Arc<dyn ToolExecutor>,
    traces: Arc<dyn TraceSource>,
    settings: ExecutorSettings,
}

impl LoopExecutor {
    pub fn new(
        registry: Arc<LoopRegistry>,
        history: Arc<ExecutionLogStore>,
        guard: Arc<dyn OverlapGuard>,
        inference: Arc<dyn InferenceClient>,
        tools: Arc<dyn ToolExecutor>,
        traces: Arc<dyn TraceSource>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            registry,
            history,
            guard,
            inference,
            tools,
            traces,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<LoopRegistry> {
        &self.registry
    }

    pub fn history(&self) -> &Arc<ExecutionLogStore> {
        &self.history
    }

    /// Run `def` once. Returns `None` when another run of the same loop is
    /// in flight (or the guard could not be consulted); otherwise the
    /// finalized log. Run failures are captured in the log, never returned.
    pub async fn execute_loop(&self, def: &LoopDefinition) -> Option<LoopExecutionLog> {
        let handle = match self.guard.try_acquire(&def.id).await {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                debug!(loop_id = %def.id, "Run already in flight, skipping");
                return None;
            }
            Err(e) => {
                warn!(loop_id = %def.id, guard = self.guard.name(), error = %e, "Overlap guard unavailable, skipping");
                return None;
            }
        };

        let started_at = Utc::now();
        let mut log = LoopExecutionLog::start(&def.id, started_at);
        let baseline = self.traces.trace_ids().await;

        if let Err(e) = self.registry.record_run(&def.id, started_at).await {
            warn!(loop_id = %def.id, error = %e, "Failed to record last run");
        }
        if let Err(e) = self.history.save(&log, &[]).await {
            warn!(execution_id = %log.id, error = %e, "Failed to persist running log");
        }
        info!(loop_id = %def.id, execution_id = %log.id, "Loop execution started");

        let system_instruction = compose_system_instruction(&self.settings.base_system_prompt, &def.prompt);
        let outcome = self.run_model(&system_instruction, &def.prompt).await;
        let run_traces = self.traces.traces_since(&baseline).await;
        let finished_at = Utc::now();

        match outcome {
            Ok(response) => {
                log.response_preview = preview(&response.text, self.settings.response_preview_chars);
                let artifact = LoopArtifact {
                    loop_id: def.id.clone(),
                    execution_id: log.id.clone(),
                    started_at,
                    finished_at,
                    prompt: def.prompt.clone(),
                    system_instruction,
                    response: response.text,
                    tool_calls: response.tool_calls,
                    traces: run_traces.clone(),
                };
                match write_artifact(&self.settings.artifact_dir, &artifact).await {
                    Ok(path) => {
                        log.status = ExecutionStatus::Completed;
                        log.log_file_path = Some(path.display().to_string());
                    }
                    Err(e) => {
                        log.status = ExecutionStatus::Failed;
                        log.error = Some(e.to_string());
                    }
                }
            }
            Err(e) => {
                log.status = ExecutionStatus::Failed;
                log.error = Some(e.to_string());
            }
        }

        self.finalize(&mut log, finished_at, &run_traces).await;
        self.guard.release(handle).await;
        Some(log)
    }

    async fn run_model(
        &self,
        system_instruction: &str,
        prompt: &str,
    ) -> std::result::Result<DrainedResponse, ProviderError> {
        let stream = self
            .inference
            .run(system_instruction, prompt, self.tools.clone())
            .await?;
        drain(stream).await
    }

    async fn finalize(
        &self,
        log: &mut LoopExecutionLog,
        finished_at: DateTime<Utc>,
        traces: &[TraceRecord],
    ) {
        log.finished_at = Some(finished_at);
        log.trace_count = traces.len();

        if let Err(e) = self.history.save(log, traces).await {
            warn!(execution_id = %log.id, error = %e, "Failed to persist execution log");
        }

        let elapsed_ms = (finished_at - log.started_at).num_milliseconds();
        match log.status {
            ExecutionStatus::Completed => info!(
                loop_id = %log.loop_id,
                execution_id = %log.id,
                elapsed_ms,
                traces = log.trace_count,
                "Loop execution completed"
            ),
            _ => warn!(
                loop_id = %log.loop_id,
                execution_id = %log.id,
                elapsed_ms,
                error = log.error.as_deref().unwrap_or("unknown"),
                "Loop execution failed"
            ),
        }
    }
}

/// Base prompt and loop prompt, separated by a blank line.
pub fn compose_system_instruction(base: &str, prompt: &str) -> String {
    let base = base.trim_end();
    if base.is_empty() {
        prompt.to_string()
    } else {
        format!("{base}\n\n{prompt}")
    }
}

/// Path of the artifact for `execution_id` under `dir`. Execution ids of
/// registered loops pass through unchanged.
pub fn artifact_path(dir: &Path, execution_id: &str) -> PathBuf {
    let file: String = execution_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    dir.join(format!("{file}.json"))
}

async fn write_artifact(dir: &Path, artifact: &LoopArtifact) -> Result<PathBuf> {
    let path = artifact_path(dir, &artifact.execution_id);
    let io_err = |e: std::io::Error| LoopError::Artifact {
        path: path.display().to_string(),
        reason: e.to_string(),
    };
    tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
    let json = serde_json::to_vec_pretty(artifact)?;
    tokio::fs::write(&path, json).await.map_err(io_err)?;
    Ok(path)
}
