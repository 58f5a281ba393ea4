//! Shared fakes and fixtures for loop tests.

use crate::executor::{ExecutorSettings, LoopExecutor};
use crate::guard::{InMemoryGuard, LeaseGuard, OverlapGuard};
use crate::history::ExecutionLogStore;
use crate::model::LoopDefinition;
use crate::registry::LoopRegistry;
use async_trait::async_trait;
use cadence_core::error::ProviderError;
use cadence_core::inference::{FragmentStream, InferenceClient, InferenceFragment};
use cadence_core::store::KvStore;
use cadence_core::tool::{ToolExecutor, ToolRegistry};
use cadence_core::trace::{TraceRecord, TraceSource};
use cadence_store::InMemoryStore;
use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};

/// A trace source tests can append to.
#[derive(Default)]
pub struct SharedTraces {
    records: RwLock<Vec<TraceRecord>>,
}

impl SharedTraces {
    pub async fn push(&self, id: &str) {
        self.records.write().await.push(TraceRecord {
            id: id.into(),
            recorded_at: Utc::now(),
            payload: serde_json::json!({ "kind": "llm_call" }),
        });
    }
}

#[async_trait]
impl TraceSource for SharedTraces {
    async fn trace_ids(&self) -> HashSet<String> {
        self.records.read().await.iter().map(|t| t.id.clone()).collect()
    }

    async fn traces(&self) -> Vec<TraceRecord> {
        self.records.read().await.clone()
    }
}

#[derive(Clone)]
enum Outcome {
    Reply(String),
    Fail(ProviderError),
    FailMidStream(String, ProviderError),
}

/// An inference client that replays a fixed outcome on every run and
/// records one trace per run.
pub struct ScriptedInference {
    outcome: Mutex<Outcome>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
    traces: Arc<SharedTraces>,
}

impl ScriptedInference {
    pub fn new(traces: Arc<SharedTraces>) -> Self {
        Self {
            outcome: Mutex::new(Outcome::Reply("done".into())),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
            traces,
        }
    }

    pub fn reply(&self, text: &str) {
        *self.outcome.lock().unwrap() = Outcome::Reply(text.into());
    }

    pub fn fail(&self, error: ProviderError) {
        *self.outcome.lock().unwrap() = Outcome::Fail(error);
    }

    pub fn fail_mid_stream(&self, partial: &str, error: ProviderError) {
        *self.outcome.lock().unwrap() = Outcome::FailMidStream(partial.into(), error);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn wait_for_calls(&self, n: usize) {
        while self.calls() < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

#[async_trait]
impl InferenceClient for ScriptedInference {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run(
        &self,
        _system_instruction: &str,
        _user_message: &str,
        _tools: Arc<dyn ToolExecutor>,
    ) -> Result<FragmentStream, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.traces.push(&format!("trace-{n}")).await;

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.outcome.lock().unwrap().clone();
        let (tx, rx) = mpsc::channel(4);
        match outcome {
            Outcome::Reply(text) => {
                tx.send(Ok(InferenceFragment::text(text))).await.unwrap();
            }
            Outcome::Fail(e) => return Err(e),
            Outcome::FailMidStream(partial, e) => {
                tx.send(Ok(InferenceFragment::text(partial))).await.unwrap();
                tx.send(Err(e)).await.unwrap();
            }
        }
        Ok(rx)
    }
}

/// Every loop component wired to one in-memory store.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub registry: Arc<LoopRegistry>,
    pub history: Arc<ExecutionLogStore>,
    pub executor: Arc<LoopExecutor>,
    pub inference: Arc<ScriptedInference>,
    pub traces: Arc<SharedTraces>,
    dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(|_| Arc::new(InMemoryGuard::new()))
    }

    pub fn with_lease() -> Self {
        Self::build(|store| Arc::new(LeaseGuard::new(store, Duration::from_secs(30))))
    }

    fn build(guard: impl FnOnce(Arc<dyn KvStore>) -> Arc<dyn OverlapGuard>) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let kv: Arc<dyn KvStore> = store.clone();
        let registry = Arc::new(LoopRegistry::new(kv.clone()));
        let history = Arc::new(ExecutionLogStore::new(kv.clone()));
        let traces = Arc::new(SharedTraces::default());
        let inference = Arc::new(ScriptedInference::new(traces.clone()));
        let dir = tempfile::tempdir().unwrap();

        let executor = Arc::new(LoopExecutor::new(
            registry.clone(),
            history.clone(),
            guard(kv),
            inference.clone(),
            Arc::new(ToolRegistry::new()),
            traces.clone(),
            ExecutorSettings {
                base_system_prompt: "Base prompt.".into(),
                artifact_dir: dir.path().join("runs"),
                response_preview_chars: 200,
            },
        ));

        Self {
            store,
            registry,
            history,
            executor,
            inference,
            traces,
            dir,
        }
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.dir.path().join("runs")
    }

    /// Register an every-minute loop.
    pub async fn add_loop(&self, id: &str) -> LoopDefinition {
        self.registry
            .upsert_loop(id, "* * * * *", &format!("prompt for {id}"), true)
            .await
            .unwrap()
    }
}
