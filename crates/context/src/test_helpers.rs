//! Shared fakes for context assembly tests.

use async_trait::async_trait;
use cadence_core::error::{KnowledgeError, SessionError};
use cadence_core::knowledge::{DomainMetadata, KnowledgeProvider, Symbol, SymbolKind};
use cadence_core::message::ContextMessage;
use cadence_core::session::{ContextSession, SessionHistoryProvider, SessionKind};
use std::collections::HashMap;

pub fn symbol(id: &str, domain: &str, kind: SymbolKind, name: &str, content: &str) -> Symbol {
    Symbol {
        id: id.into(),
        domain: domain.into(),
        kind,
        name: name.into(),
        content: content.into(),
        created_at: None,
    }
}

/// An in-memory catalog. Search matches the query against symbol names,
/// contents and kinds.
#[derive(Default)]
pub struct FakeKnowledge {
    domains: Vec<DomainMetadata>,
    symbols: Vec<Symbol>,
    fail_domains: bool,
    failing_queries: Vec<String>,
}

impl FakeKnowledge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_domain(mut self, id: &str, name: &str) -> Self {
        self.domains.push(DomainMetadata {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            symbol_count: 0,
        });
        self
    }

    pub fn with_symbol(mut self, symbol: Symbol) -> Self {
        if let Some(d) = self.domains.iter_mut().find(|d| d.id == symbol.domain) {
            d.symbol_count += 1;
        }
        self.symbols.push(symbol);
        self
    }

    pub fn failing_domains(mut self) -> Self {
        self.fail_domains = true;
        self
    }

    pub fn failing_query(mut self, query: &str) -> Self {
        self.failing_queries.push(query.into());
        self
    }
}

fn kind_name(kind: SymbolKind) -> String {
    serde_json::to_value(kind)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

#[async_trait]
impl KnowledgeProvider for FakeKnowledge {
    async fn list_domains_metadata(&self) -> Result<Vec<DomainMetadata>, KnowledgeError> {
        if self.fail_domains {
            return Err(KnowledgeError::Unavailable("catalog offline".into()));
        }
        Ok(self.domains.clone())
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        domains: &[String],
    ) -> Result<Vec<Symbol>, KnowledgeError> {
        if self.failing_queries.iter().any(|q| q == query) {
            return Err(KnowledgeError::SearchFailed(query.into()));
        }
        let q = query.to_lowercase();
        Ok(self
            .symbols
            .iter()
            .filter(|s| domains.is_empty() || domains.contains(&s.domain))
            .filter(|s| {
                s.name.to_lowercase().contains(&q)
                    || s.content.to_lowercase().contains(&q)
                    || kind_name(s.kind) == q
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_symbols_of_domain(&self, domain_id: &str) -> Result<Vec<Symbol>, KnowledgeError> {
        if !self.domains.iter().any(|d| d.id == domain_id) {
            return Err(KnowledgeError::DomainNotFound(domain_id.into()));
        }
        Ok(self
            .symbols
            .iter()
            .filter(|s| s.domain == domain_id)
            .cloned()
            .collect())
    }
}

/// An in-memory session store.
#[derive(Default)]
pub struct FakeSessions {
    sessions: HashMap<String, ContextSession>,
    histories: HashMap<String, Vec<ContextMessage>>,
    failing_history: bool,
}

impl FakeSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, id: &str, kind: SessionKind, history: Vec<ContextMessage>) -> Self {
        self.sessions
            .insert(id.into(), ContextSession::new(id, kind));
        self.histories.insert(id.into(), history);
        self
    }

    pub fn failing_history(mut self) -> Self {
        self.failing_history = true;
        self
    }
}

#[async_trait]
impl SessionHistoryProvider for FakeSessions {
    async fn get_session(&self, id: &str) -> Result<Option<ContextSession>, SessionError> {
        Ok(self.sessions.get(id).cloned())
    }

    async fn get_history(&self, id: &str) -> Result<Vec<ContextMessage>, SessionError> {
        if self.failing_history {
            return Err(SessionError::HistoryUnavailable {
                session_id: id.into(),
                reason: "disk on fire".into(),
            });
        }
        Ok(self.histories.get(id).cloned().unwrap_or_default())
    }
}
