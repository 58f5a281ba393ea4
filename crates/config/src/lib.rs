//! Configuration loading, validation, and management for Cadence.
//!
//! Loads configuration from `~/.cadence/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.cadence/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Prepended to every loop's own prompt to form its system instruction
    #[serde(default = "default_base_system_prompt")]
    pub base_system_prompt: String,

    /// Inference endpoint configuration
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Time-bucket store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Context assembly limits
    #[serde(default)]
    pub context: ContextConfig,

    /// Scheduler, executor and sweeper configuration
    #[serde(default)]
    pub loops: LoopsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_base_system_prompt() -> String {
    "You are an autonomous assistant running a scheduled task. \
     Complete the task described below and report the outcome concisely."
        .into()
}

// ── Inference ─────────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Completion requests allowed per run while the model keeps calling tools
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_iterations() -> u32 {
    8
}
fn default_timeout_secs() -> u64 {
    120
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
            max_iterations: default_max_iterations(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for InferenceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_iterations", &self.max_iterations)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// ── Store ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,

    /// Database file for the sqlite backend
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Sqlite
}
fn default_store_path() -> PathBuf {
    AppConfig::config_dir().join("cadence.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
        }
    }
}

// ── Context ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Estimated tokens allowed for conversation history
    #[serde(default = "default_history_token_budget")]
    pub history_token_budget: usize,

    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    /// Token estimator constant: bytes per token
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,

    #[serde(default = "default_core_search_limit")]
    pub core_search_limit: usize,

    #[serde(default = "default_ten")]
    pub persona_limit: usize,

    #[serde(default = "default_ten")]
    pub identity_search_limit: usize,

    #[serde(default = "default_ten")]
    pub preference_search_limit: usize,

    /// State symbols fetched before keeping the newest `state_limit`
    #[serde(default = "default_state_search_limit")]
    pub state_search_limit: usize,

    #[serde(default = "default_state_limit")]
    pub state_limit: usize,

    #[serde(default = "default_root_domain")]
    pub root_domain: String,
}

fn default_history_token_budget() -> usize {
    12_000
}
fn default_max_rounds() -> usize {
    10
}
fn default_chars_per_token() -> usize {
    4
}
fn default_core_search_limit() -> usize {
    20
}
fn default_ten() -> usize {
    10
}
fn default_state_search_limit() -> usize {
    50
}
fn default_state_limit() -> usize {
    5
}
fn default_root_domain() -> String {
    "root".into()
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            history_token_budget: default_history_token_budget(),
            max_rounds: default_max_rounds(),
            chars_per_token: default_chars_per_token(),
            core_search_limit: default_core_search_limit(),
            persona_limit: default_ten(),
            identity_search_limit: default_ten(),
            preference_search_limit: default_ten(),
            state_search_limit: default_state_search_limit(),
            state_limit: default_state_limit(),
            root_domain: default_root_domain(),
        }
    }
}

// ── Loops ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardKind {
    /// Process-local set
    Memory,
    /// Store-backed fencing lease
    Lease,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopsConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Execution records older than this are swept
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Where per-execution JSON artifacts are written
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,

    #[serde(default = "default_response_preview_chars")]
    pub response_preview_chars: usize,

    #[serde(default = "default_guard")]
    pub guard: GuardKind,

    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,

    /// Loops upserted into the registry when the daemon starts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub definitions: Vec<LoopSeedConfig>,
}

fn default_tick_interval_secs() -> u64 {
    60
}
fn default_sweep_interval_secs() -> u64 {
    3600
}
fn default_retention_days() -> u32 {
    7
}
fn default_artifact_dir() -> PathBuf {
    AppConfig::config_dir().join("loop-runs")
}
fn default_response_preview_chars() -> usize {
    200
}
fn default_guard() -> GuardKind {
    GuardKind::Memory
}
fn default_lease_ttl_secs() -> u64 {
    300
}

impl Default for LoopsConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            retention_days: default_retention_days(),
            artifact_dir: default_artifact_dir(),
            response_preview_chars: default_response_preview_chars(),
            guard: default_guard(),
            lease_ttl_secs: default_lease_ttl_secs(),
            definitions: Vec::new(),
        }
    }
}

/// A loop declared in config.
///
/// ```toml
/// [[loops.definitions]]
/// id = "morning-digest"
/// schedule = "0 8 * * *"
/// prompt = "Summarize overnight activity"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSeedConfig {
    pub id: String,
    pub schedule: String,
    pub prompt: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

// ── Logging ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from the default path (~/.cadence/config.toml).
    ///
    /// Environment overrides:
    /// - `CADENCE_API_KEY`, then `OPENAI_API_KEY` (when no key is configured)
    /// - `CADENCE_MODEL`
    /// - `CADENCE_API_URL`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_path())
    }

    /// Load from `path`, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;

        if config.inference.api_key.is_none() {
            config.inference.api_key = std::env::var("CADENCE_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("CADENCE_MODEL") {
            config.inference.model = model;
        }

        if let Ok(url) = std::env::var("CADENCE_API_URL") {
            config.inference.api_url = url;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".cadence")
    }

    /// Get the default configuration file path.
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let inference = &self.inference;
        if !(0.0..=2.0).contains(&inference.temperature) {
            return Err(ConfigError::ValidationError(
                "inference.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if inference.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "inference.max_iterations must be > 0".into(),
            ));
        }

        let context = &self.context;
        for (name, value) in [
            ("context.history_token_budget", context.history_token_budget),
            ("context.max_rounds", context.max_rounds),
            ("context.chars_per_token", context.chars_per_token),
            ("context.core_search_limit", context.core_search_limit),
            ("context.persona_limit", context.persona_limit),
            ("context.identity_search_limit", context.identity_search_limit),
            ("context.preference_search_limit", context.preference_search_limit),
            ("context.state_search_limit", context.state_search_limit),
            ("context.state_limit", context.state_limit),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!("{name} must be > 0")));
            }
        }

        let loops = &self.loops;
        if loops.tick_interval_secs == 0 || loops.sweep_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "loops tick and sweep intervals must be > 0".into(),
            ));
        }
        if loops.retention_days == 0 {
            return Err(ConfigError::ValidationError(
                "loops.retention_days must be > 0".into(),
            ));
        }
        if loops.lease_ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "loops.lease_ttl_secs must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.inference.api_key.is_some()
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_system_prompt: default_base_system_prompt(),
            inference: InferenceConfig::default(),
            store: StoreConfig::default(),
            context: ContextConfig::default(),
            loops: LoopsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
