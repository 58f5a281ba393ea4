//! Wiring from [`AppConfig`] to the library crates.

use cadence_config::{AppConfig, ContextConfig, GuardKind, LoopSeedConfig, LoopsConfig, StoreBackend, StoreConfig};
use cadence_context::{AssemblerSettings, KnowledgeSettings};
use cadence_core::store::KvStore;
use cadence_core::tool::ToolRegistry;
use cadence_loops::{
    ExecutionLogStore, ExecutorSettings, InMemoryGuard, LeaseGuard, LoopExecutor, LoopRegistry,
    OverlapGuard, RuntimeSettings,
};
use cadence_providers::OpenAiCompatClient;
use cadence_store::{InMemoryStore, SqliteStore};
use cadence_telemetry::TraceRecorder;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Open the configured key-value store.
pub async fn open_store(config: &StoreConfig) -> CliResult<Arc<dyn KvStore>> {
    match config.backend {
        StoreBackend::Memory => {
            warn!("Using the in-memory store; nothing will persist past this process");
            Ok(Arc::new(InMemoryStore::new()))
        }
        StoreBackend::Sqlite => {
            if let Some(parent) = config.path.parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await?;
            }
            let store = SqliteStore::new(&config.path.to_string_lossy()).await?;
            Ok(Arc::new(store))
        }
    }
}

/// Store-backed loop state shared by every command.
pub struct Services {
    pub store: Arc<dyn KvStore>,
    pub registry: Arc<LoopRegistry>,
    pub history: Arc<ExecutionLogStore>,
}

impl Services {
    pub async fn open(config: &AppConfig) -> CliResult<Self> {
        Ok(Self::with_store(open_store(&config.store).await?))
    }

    pub fn with_store(store: Arc<dyn KvStore>) -> Self {
        Self {
            registry: Arc::new(LoopRegistry::new(Arc::clone(&store))),
            history: Arc::new(ExecutionLogStore::new(Arc::clone(&store))),
            store,
        }
    }

    /// Build an executor that calls the configured model.
    pub fn executor(&self, config: &AppConfig) -> CliResult<Arc<LoopExecutor>> {
        if !config.has_api_key() {
            warn!("No API key configured; loop runs will fail until one is set");
        }
        let recorder = Arc::new(TraceRecorder::new());
        let inference = OpenAiCompatClient::from_config(&config.inference)?
            .with_recorder(Arc::clone(&recorder));

        Ok(Arc::new(LoopExecutor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.history),
            overlap_guard(&config.loops, Arc::clone(&self.store)),
            Arc::new(inference),
            Arc::new(ToolRegistry::new()),
            recorder,
            executor_settings(config),
        )))
    }
}

pub fn overlap_guard(config: &LoopsConfig, store: Arc<dyn KvStore>) -> Arc<dyn OverlapGuard> {
    match config.guard {
        GuardKind::Memory => Arc::new(InMemoryGuard::new()),
        GuardKind::Lease => Arc::new(LeaseGuard::new(
            store,
            Duration::from_secs(config.lease_ttl_secs),
        )),
    }
}

pub fn executor_settings(config: &AppConfig) -> ExecutorSettings {
    ExecutorSettings {
        base_system_prompt: config.base_system_prompt.clone(),
        artifact_dir: config.loops.artifact_dir.clone(),
        response_preview_chars: config.loops.response_preview_chars,
    }
}

pub fn runtime_settings(config: &LoopsConfig) -> RuntimeSettings {
    RuntimeSettings {
        tick_interval: Duration::from_secs(config.tick_interval_secs),
        sweep_interval: Duration::from_secs(config.sweep_interval_secs),
        retention: chrono::Duration::days(i64::from(config.retention_days)),
    }
}

pub fn assembler_settings(config: &ContextConfig) -> AssemblerSettings {
    AssemblerSettings {
        history_token_budget: config.history_token_budget,
        max_rounds: config.max_rounds,
        knowledge: KnowledgeSettings {
            core_search_limit: config.core_search_limit,
            persona_limit: config.persona_limit,
            identity_search_limit: config.identity_search_limit,
            preference_search_limit: config.preference_search_limit,
            state_search_limit: config.state_search_limit,
            state_limit: config.state_limit,
            root_domain: config.root_domain.clone(),
        },
    }
}

/// Upsert loops declared in config. Returns how many were written and the
/// errors for the rest.
pub async fn seed_loops(registry: &LoopRegistry, seeds: &[LoopSeedConfig]) -> (usize, Vec<String>) {
    let mut loaded = 0;
    let mut errors = Vec::new();
    for seed in seeds {
        match registry
            .upsert_loop(&seed.id, &seed.schedule, &seed.prompt, seed.enabled)
            .await
        {
            Ok(_) => loaded += 1,
            Err(e) => errors.push(format!("{}: {e}", seed.id)),
        }
    }
    if !seeds.is_empty() {
        info!(loaded, total = seeds.len(), "Loops seeded from config");
    }
    (loaded, errors)
}
