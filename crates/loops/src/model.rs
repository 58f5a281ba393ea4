//! Persisted loop records.

use cadence_core::tool::ToolCall;
use cadence_core::trace::TraceRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A scheduled loop: a cron schedule plus the prompt it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopDefinition {
    /// Caller-assigned unique id
    pub id: String,

    /// Cron expression, validated on every write
    pub schedule: String,

    /// Appended to the base system prompt; also the run's user message
    pub prompt: String,

    pub enabled: bool,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Start of the most recent run, recorded before the model is called
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Execution lifecycle. Terminal once it leaves `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        self != Self::Running
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// The durable record of one loop execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopExecutionLog {
    /// `{loop_id}-{started_at epoch millis}`
    pub id: String,

    pub loop_id: String,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    pub status: ExecutionStatus,

    /// Traces captured during the run
    pub trace_count: usize,

    /// Artifact file, present only for completed runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file_path: Option<String>,

    /// Bounded prefix of the response text
    #[serde(default)]
    pub response_preview: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LoopExecutionLog {
    /// Derive the execution id for a run of `loop_id` starting at `started_at`.
    pub fn execution_id(loop_id: &str, started_at: DateTime<Utc>) -> String {
        format!("{loop_id}-{}", started_at.timestamp_millis())
    }

    /// A fresh log in the running state.
    pub fn start(loop_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Self::execution_id(loop_id, started_at),
            loop_id: loop_id.to_string(),
            started_at,
            finished_at: None,
            status: ExecutionStatus::Running,
            trace_count: 0,
            log_file_path: None,
            response_preview: String::new(),
            error: None,
        }
    }

    /// Wall-clock duration, once finished.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|f| f - self.started_at)
    }
}

/// The JSON artifact written for each completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopArtifact {
    pub loop_id: String,
    pub execution_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub prompt: String,
    pub system_instruction: String,
    pub response: String,
    pub tool_calls: Vec<ToolCall>,
    pub traces: Vec<TraceRecord>,
}

/// First `max_chars` characters of `text`.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
