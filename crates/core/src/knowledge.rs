//! Knowledge catalog — read-only queries over symbols grouped into domains.
//!
//! The catalog itself (CRUD, embeddings, vector search) lives outside this
//! workspace. The context assembler only needs the three queries exposed
//! by [`KnowledgeProvider`].

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::KnowledgeError;

/// Classification of a symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Persona,
    Identity,
    Preference,
    State,
    Core,
    #[default]
    #[serde(other)]
    Other,
}

/// A single knowledge record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    /// Catalog id. State symbols conventionally end in `-{epochMillis}`.
    pub id: String,

    /// Owning domain id
    pub domain: String,

    #[serde(default)]
    pub kind: SymbolKind,

    /// Short human-readable name
    pub name: String,

    /// Body text injected into prompts
    #[serde(default)]
    pub content: String,

    /// Explicit creation time, when the catalog records one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Symbol {
    /// Creation time: the explicit field, else decoded from a trailing
    /// epoch-millis segment of the id (`state-1767225600000`).
    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        if let Some(at) = self.created_at {
            return Some(at);
        }
        let tail = self.id.rsplit(['-', ':', '_']).next()?;
        let millis: i64 = tail.parse().ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }
}

/// Catalog metadata about one domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainMetadata {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub symbol_count: usize,
}

/// Read-only queries the context assembler issues against the catalog.
#[async_trait]
pub trait KnowledgeProvider: Send + Sync {
    /// Metadata for every domain in the catalog.
    async fn list_domains_metadata(&self) -> Result<Vec<DomainMetadata>, KnowledgeError>;

    /// Keyword search scoped to `domains` (empty = all domains).
    async fn search(
        &self,
        query: &str,
        limit: usize,
        domains: &[String],
    ) -> Result<Vec<Symbol>, KnowledgeError>;

    /// Every symbol of one domain.
    async fn get_symbols_of_domain(&self, domain_id: &str) -> Result<Vec<Symbol>, KnowledgeError>;
}
