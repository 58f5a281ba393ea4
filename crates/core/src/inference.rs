//! Inference client seam — the model behind every loop run and chat turn.
//!
//! A run is a stateless exchange: one system instruction, one user message,
//! and a stream of fragments back. Tool calls the model makes are executed
//! through the caller's [`ToolExecutor`] before the stream continues.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::tool::{ToolCall, ToolExecutor};

/// One piece of a streamed response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferenceFragment {
    /// Text delta
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Batch of tool calls the model issued (already executed)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl InferenceFragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text: None,
            tool_calls,
        }
    }
}

/// Receiving half of a running inference.
pub type FragmentStream = mpsc::Receiver<Result<InferenceFragment, ProviderError>>;

/// The core InferenceClient trait.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// A human-readable name (e.g., "openai", "scripted").
    fn name(&self) -> &str;

    /// Start a fresh run. Errors before the first fragment are returned
    /// directly; errors mid-run arrive on the stream.
    async fn run(
        &self,
        system_instruction: &str,
        user_message: &str,
        tools: Arc<dyn ToolExecutor>,
    ) -> Result<FragmentStream, ProviderError>;
}

/// Everything a drained stream produced.
#[derive(Debug, Clone, Default)]
pub struct DrainedResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Drain a fragment stream, accumulating text and tool calls.
/// Stops at the first error.
pub async fn drain(mut stream: FragmentStream) -> Result<DrainedResponse, ProviderError> {
    let mut response = DrainedResponse::default();
    while let Some(fragment) = stream.recv().await {
        let fragment = fragment?;
        if let Some(text) = fragment.text {
            response.text.push_str(&text);
        }
        response.tool_calls.extend(fragment.tool_calls);
    }
    Ok(response)
}
