//! File-backed session and knowledge sources for `cadence context preview`.

use crate::app::CliResult;
use async_trait::async_trait;
use cadence_core::error::{KnowledgeError, SessionError};
use cadence_core::knowledge::{DomainMetadata, KnowledgeProvider, Symbol};
use cadence_core::message::ContextMessage;
use cadence_core::session::{ContextSession, SessionHistoryProvider, SessionKind};
use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize)]
#[serde(untagged)]
enum TranscriptFile {
    Messages(Vec<ContextMessage>),
    Session {
        #[serde(default)]
        session: Option<ContextSession>,
        messages: Vec<ContextMessage>,
    },
}

/// A single session read from a JSON transcript.
pub struct Transcript {
    session: ContextSession,
    messages: Vec<ContextMessage>,
}

impl Transcript {
    /// Parse a transcript. A bare message array becomes a conversation
    /// session named `fallback_id`.
    pub fn parse(raw: &str, fallback_id: &str) -> Result<Self, serde_json::Error> {
        let (session, messages) = match serde_json::from_str(raw)? {
            TranscriptFile::Messages(messages) => (None, messages),
            TranscriptFile::Session { session, messages } => (session, messages),
        };
        Ok(Self {
            session: session
                .unwrap_or_else(|| ContextSession::new(fallback_id, SessionKind::Conversation)),
            messages,
        })
    }

    pub async fn load(path: &Path) -> CliResult<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
        let fallback_id = path
            .file_stem()
            .map_or_else(|| "transcript".to_string(), |s| s.to_string_lossy().into_owned());
        Ok(Self::parse(&raw, &fallback_id)
            .map_err(|e| format!("Invalid transcript {}: {e}", path.display()))?)
    }

    pub fn session_id(&self) -> &str {
        &self.session.id
    }

    pub fn with_kind(mut self, kind: SessionKind) -> Self {
        self.session.kind = kind;
        self
    }
}

#[async_trait]
impl SessionHistoryProvider for Transcript {
    async fn get_session(&self, id: &str) -> Result<Option<ContextSession>, SessionError> {
        Ok((id == self.session.id).then(|| self.session.clone()))
    }

    async fn get_history(&self, id: &str) -> Result<Vec<ContextMessage>, SessionError> {
        if id == self.session.id {
            Ok(self.messages.clone())
        } else {
            Ok(Vec::new())
        }
    }
}

/// A knowledge catalog frozen into a JSON file.
#[derive(Debug, Default, Deserialize)]
pub struct KnowledgeSnapshot {
    #[serde(default)]
    domains: Vec<DomainMetadata>,
    #[serde(default)]
    symbols: Vec<Symbol>,
}

impl KnowledgeSnapshot {
    pub async fn load(path: &Path) -> CliResult<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
        Ok(serde_json::from_str(&raw)
            .map_err(|e| format!("Invalid knowledge snapshot {}: {e}", path.display()))?)
    }
}

fn kind_name(symbol: &Symbol) -> String {
    serde_json::to_value(symbol.kind)
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default()
}

#[async_trait]
impl KnowledgeProvider for KnowledgeSnapshot {
    async fn list_domains_metadata(&self) -> Result<Vec<DomainMetadata>, KnowledgeError> {
        Ok(self.domains.clone())
    }

    /// Case-insensitive substring match on name and content, or an exact
    /// match on the kind name.
    async fn search(
        &self,
        query: &str,
        limit: usize,
        domains: &[String],
    ) -> Result<Vec<Symbol>, KnowledgeError> {
        let q = query.to_lowercase();
        Ok(self
            .symbols
            .iter()
            .filter(|s| domains.is_empty() || domains.contains(&s.domain))
            .filter(|s| {
                kind_name(s) == q
                    || s.name.to_lowercase().contains(&q)
                    || s.content.to_lowercase().contains(&q)
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_symbols_of_domain(&self, domain_id: &str) -> Result<Vec<Symbol>, KnowledgeError> {
        Ok(self
            .symbols
            .iter()
            .filter(|s| s.domain == domain_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::knowledge::SymbolKind;

    #[test]
    fn bare_array_becomes_conversation() {
        let raw = r#"[
            {"id": "m1", "role": "user", "content": "hi", "timestamp": "2026-01-01T00:00:00Z"},
            {"id": "m2", "role": "model", "content": "hello", "timestamp": "2026-01-01T00:00:01Z"}
        ]"#;
        let transcript = Transcript::parse(raw, "chat").unwrap();
        assert_eq!(transcript.session_id(), "chat");
        assert_eq!(transcript.session.kind, SessionKind::Conversation);
        assert_eq!(transcript.messages.len(), 2);
    }

    #[test]
    fn object_form_keeps_session() {
        let raw = r#"{
            "session": {
                "id": "loop-run",
                "kind": "loop",
                "created_at": "2026-01-01T00:00:00Z",
                "updated_at": "2026-01-01T00:00:00Z"
            },
            "messages": []
        }"#;
        let transcript = Transcript::parse(raw, "ignored").unwrap();
        assert_eq!(transcript.session_id(), "loop-run");
        assert_eq!(transcript.session.kind, SessionKind::Loop);
    }

    #[tokio::test]
    async fn unknown_session_has_no_history() {
        let transcript = Transcript::parse("[]", "chat").unwrap();
        assert!(transcript.get_session("other").await.unwrap().is_none());
        assert!(transcript.get_history("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn snapshot_search_matches_kind_and_text() {
        let snapshot: KnowledgeSnapshot = serde_json::from_str(
            r#"{
                "domains": [{"id": "root", "name": "Root"}],
                "symbols": [
                    {"id": "p1", "domain": "root", "kind": "persona", "name": "Tone", "content": "Dry"},
                    {"id": "s1", "domain": "root", "kind": "state", "name": "Mood"},
                    {"id": "c1", "domain": "work", "kind": "core", "name": "Project state"}
                ]
            }"#,
        )
        .unwrap();

        let state = snapshot.search("state", 10, &[]).await.unwrap();
        assert_eq!(state.len(), 2);

        let scoped = snapshot.search("state", 10, &["root".into()]).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].kind, SymbolKind::State);

        let root = snapshot.get_symbols_of_domain("root").await.unwrap();
        assert_eq!(root.len(), 2);
    }
}
