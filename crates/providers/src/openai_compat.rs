//! OpenAI-compatible inference client.
//!
//! Works with any endpoint exposing `/chat/completions` (OpenAI, OpenRouter,
//! Ollama, vLLM). Each run is a fresh two-message exchange; tool calls the
//! model makes are executed through the caller's [`ToolExecutor`] and fed
//! back until the model answers with plain text.

use async_trait::async_trait;
use cadence_config::InferenceConfig;
use cadence_core::error::ProviderError;
use cadence_core::inference::{FragmentStream, InferenceClient, InferenceFragment};
use cadence_core::tool::{ToolCall, ToolDefinition, ToolExecutor};
use cadence_telemetry::{Span, SpanKind, TraceRecorder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 32;
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Connection and sampling settings for one endpoint.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub max_iterations: u32,
    pub timeout: Duration,
}

impl From<&InferenceConfig> for ClientSettings {
    fn from(config: &InferenceConfig) -> Self {
        Self {
            base_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_iterations: config.max_iterations,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// An OpenAI-compatible [`InferenceClient`].
pub struct OpenAiCompatClient {
    endpoint: Arc<Endpoint>,
    max_iterations: u32,
    recorder: Option<Arc<TraceRecorder>>,
}

impl OpenAiCompatClient {
    pub fn new(settings: ClientSettings) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            endpoint: Arc::new(Endpoint {
                base_url: settings.base_url.trim_end_matches('/').to_string(),
                api_key: settings.api_key.filter(|k| !k.is_empty()),
                model: settings.model,
                temperature: settings.temperature,
                max_tokens: settings.max_tokens,
                client,
            }),
            max_iterations: settings.max_iterations.max(1),
            recorder: None,
        })
    }

    pub fn from_config(config: &InferenceConfig) -> Result<Self, ProviderError> {
        Self::new(ClientSettings::from(config))
    }

    /// Record a trace per run into `recorder`.
    pub fn with_recorder(mut self, recorder: Arc<TraceRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn model(&self) -> &str {
        &self.endpoint.model
    }
}

#[async_trait]
impl InferenceClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        "openai_compat"
    }

    async fn run(
        &self,
        system_instruction: &str,
        user_message: &str,
        tools: Arc<dyn ToolExecutor>,
    ) -> Result<FragmentStream, ProviderError> {
        if self.endpoint.api_key.is_none() {
            return Err(ProviderError::NotConfigured(
                "no API key (set CADENCE_API_KEY or inference.api_key)".into(),
            ));
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let run = ToolLoop {
            endpoint: Arc::clone(&self.endpoint),
            tools,
            recorder: self.recorder.clone(),
            max_iterations: self.max_iterations,
            messages: vec![
                ApiMessage::text("system", system_instruction),
                ApiMessage::text("user", user_message),
            ],
        };
        tokio::spawn(run.drive(tx));
        Ok(rx)
    }
}

// ── HTTP endpoint ─────────────────────────────────────────────────────────

struct Endpoint {
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    client: reqwest::Client,
}

/// One parsed completion.
#[derive(Debug)]
struct Completion {
    content: Option<String>,
    tool_calls: Vec<ApiToolCall>,
    usage: Option<ApiUsage>,
}

impl Endpoint {
    fn request_body(&self, messages: &[ApiMessage], tools: &[ToolDefinition]) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "stream": false,
        });

        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !tools.is_empty() {
            body["tools"] = serde_json::json!(to_api_tools(tools));
        }

        body
    }

    async fn complete(
        &self,
        messages: &[ApiMessage],
        tools: &[ToolDefinition],
    ) -> Result<Completion, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(messages, tools);

        debug!(model = %self.model, messages = messages.len(), "Sending completion request");

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Endpoint returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        parse_completion(api_response)
    }
}

fn parse_completion(api_response: ApiResponse) -> Result<Completion, ProviderError> {
    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::ApiError {
            status_code: 200,
            message: "No choices in response".into(),
        })?;

    Ok(Completion {
        content: choice.message.content,
        tool_calls: choice.message.tool_calls.unwrap_or_default(),
        usage: api_response.usage,
    })
}

fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
    tools
        .iter()
        .map(|t| ApiToolDefinition {
            r#type: "function".into(),
            function: ApiToolFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            },
        })
        .collect()
}

/// Arguments arrive as a JSON string; fall back to the raw string.
fn parse_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

// ── Tool loop ─────────────────────────────────────────────────────────────

struct ToolLoop {
    endpoint: Arc<Endpoint>,
    tools: Arc<dyn ToolExecutor>,
    recorder: Option<Arc<TraceRecorder>>,
    max_iterations: u32,
    messages: Vec<ApiMessage>,
}

type FragmentSender = mpsc::Sender<Result<InferenceFragment, ProviderError>>;

impl ToolLoop {
    async fn drive(mut self, tx: FragmentSender) {
        let trace_id = match &self.recorder {
            Some(recorder) => Some(recorder.start_trace(self.endpoint.model.clone()).await),
            None => None,
        };
        let mut turn = Span::new(SpanKind::Turn, self.endpoint.model.clone());
        let turn_id = turn.id.clone();

        let outcome = self.iterate(&tx, trace_id.as_deref(), &turn_id).await;
        turn.end(outcome.is_ok());
        self.record(trace_id.as_deref(), turn).await;
        if let (Some(recorder), Some(id)) = (&self.recorder, &trace_id) {
            recorder.end_trace(id).await;
        }

        if let Err(e) = outcome {
            // Receiver may be gone already
            let _ = tx.send(Err(e)).await;
        }
    }

    async fn iterate(
        &mut self,
        tx: &FragmentSender,
        trace_id: Option<&str>,
        turn_id: &str,
    ) -> Result<(), ProviderError> {
        let definitions = self.tools.definitions();

        for iteration in 0..self.max_iterations {
            let mut span =
                Span::new(SpanKind::LlmCall, self.endpoint.model.clone()).with_parent(turn_id);
            let result = self.endpoint.complete(&self.messages, &definitions).await;
            span.end(result.is_ok());
            if let Ok(Completion {
                usage: Some(usage), ..
            }) = &result
            {
                span.record_tokens(usage.prompt_tokens, usage.completion_tokens);
            }
            self.record(trace_id, span).await;
            let completion = result?;

            if completion.tool_calls.is_empty() {
                let text = completion.content.unwrap_or_default();
                debug!(iteration, chars = text.len(), "Model produced final response");
                let _ = tx.send(Ok(InferenceFragment::text(text))).await;
                return Ok(());
            }

            debug!(iteration, calls = completion.tool_calls.len(), "Model requested tools");
            let calls: Vec<ToolCall> = completion
                .tool_calls
                .iter()
                .map(|tc| ToolCall {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    arguments: parse_arguments(&tc.function.arguments),
                })
                .collect();

            self.messages.push(ApiMessage {
                role: "assistant".into(),
                content: completion.content.clone().filter(|c| !c.is_empty()),
                tool_calls: Some(completion.tool_calls),
                tool_call_id: None,
            });

            for call in &calls {
                let output = self.execute_tool(call, trace_id, turn_id).await;
                self.messages.push(ApiMessage {
                    role: "tool".into(),
                    content: Some(output),
                    tool_calls: None,
                    tool_call_id: Some(call.id.clone()),
                });
            }

            if let Some(text) = completion.content.filter(|c| !c.is_empty())
                && tx.send(Ok(InferenceFragment::text(text))).await.is_err()
            {
                return Ok(());
            }
            if tx.send(Ok(InferenceFragment::tool_calls(calls))).await.is_err() {
                debug!("Fragment receiver dropped; abandoning run");
                return Ok(());
            }
        }

        Err(ProviderError::IterationLimit(self.max_iterations))
    }

    /// Run one tool call and render its outcome as tool-message content.
    async fn execute_tool(&self, call: &ToolCall, trace_id: Option<&str>, turn_id: &str) -> String {
        let mut span = Span::new(SpanKind::ToolExecution, call.name.clone()).with_parent(turn_id);
        let (ok, output) = match self.tools.execute(call).await {
            Ok(result) if result.success => (true, result.output),
            Ok(result) => (false, format!("Error: {}", result.output)),
            Err(e) => (false, format!("Error: {e}")),
        };
        if !ok {
            warn!(tool = %call.name, "Tool call failed");
        }
        span.end(ok);
        self.record(trace_id, span).await;
        output
    }

    async fn record(&self, trace_id: Option<&str>, span: Span) {
        if let (Some(recorder), Some(id)) = (&self.recorder, trace_id)
            && let Err(e) = recorder.record_span(id, span).await
        {
            warn!(error = %e, "Failed to record span");
        }
    }
}

// ── Wire types ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
