//! # Cadence Core
//!
//! Domain types, traits, and error definitions for the Cadence LLM
//! orchestration core. This crate has **no runtime dependencies beyond
//! tokio's sync primitives**: it defines the seams that every other crate
//! implements against.
//!
//! ## Seams
//!
//! Every external collaborator is a trait here:
//! - [`KvStore`]: the durable time-bucket store
//! - [`KnowledgeProvider`]: read-only symbol/domain catalog
//! - [`SessionHistoryProvider`]: session metadata and message logs
//! - [`InferenceClient`]: the model, driven with a caller-supplied [`ToolExecutor`]
//! - [`TraceSource`]: trace records captured during model calls

pub mod error;
pub mod inference;
pub mod knowledge;
pub mod message;
pub mod session;
pub mod store;
pub mod tool;
pub mod trace;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use inference::{DrainedResponse, FragmentStream, InferenceClient, InferenceFragment};
pub use knowledge::{DomainMetadata, KnowledgeProvider, Symbol, SymbolKind};
pub use message::{ContextMessage, MessageToolCall, Role};
pub use session::{ContextSession, SessionHistoryProvider, SessionKind};
pub use store::KvStore;
pub use tool::{Tool, ToolCall, ToolDefinition, ToolExecutor, ToolRegistry, ToolResult};
pub use trace::{NoopTraceSource, TraceRecord, TraceSource};
