//! Knowledge injection.
//!
//! Builds the system message that follows the caller's system prompt:
//! catalog metadata, core symbols, the persona slice and, for
//! conversations only, identity, preference and recent state symbols.

use cadence_core::knowledge::{DomainMetadata, KnowledgeProvider, Symbol, SymbolKind};
use cadence_core::session::SessionKind;
use std::fmt::Write;
use tracing::warn;

/// Marker emitted in place of the block when the catalog is unreachable.
pub const KNOWLEDGE_UNAVAILABLE: &str = "[knowledge unavailable]";

/// Query limits for the knowledge block.
#[derive(Debug, Clone)]
pub struct KnowledgeSettings {
    pub core_search_limit: usize,
    pub persona_limit: usize,
    pub identity_search_limit: usize,
    pub preference_search_limit: usize,
    /// Candidates fetched before picking the most recent state symbols
    pub state_search_limit: usize,
    pub state_limit: usize,
    pub root_domain: String,
}

impl Default for KnowledgeSettings {
    fn default() -> Self {
        Self {
            core_search_limit: 20,
            persona_limit: 10,
            identity_search_limit: 10,
            preference_search_limit: 10,
            state_search_limit: 50,
            state_limit: 5,
            root_domain: "root".into(),
        }
    }
}

/// Build the knowledge block text for a session of `kind`.
///
/// Never fails: each query that errors is logged and left out, and a
/// failure to list domains replaces the whole block with
/// [`KNOWLEDGE_UNAVAILABLE`].
pub async fn build_knowledge_block(
    provider: &dyn KnowledgeProvider,
    kind: SessionKind,
    settings: &KnowledgeSettings,
) -> String {
    let domains = match provider.list_domains_metadata().await {
        Ok(domains) => domains,
        Err(e) => {
            warn!(error = %e, "Knowledge catalog unavailable");
            return KNOWLEDGE_UNAVAILABLE.to_string();
        }
    };
    let domain_ids: Vec<String> = domains.iter().map(|d| d.id.clone()).collect();

    let mut block = String::from("# Knowledge\n");
    render_domains(&mut block, &domains);

    let core = search_or_skip(provider, "core", settings.core_search_limit, &domain_ids).await;
    render_symbols(&mut block, "Core", &core);

    let persona: Vec<Symbol> = match provider.get_symbols_of_domain(&settings.root_domain).await {
        Ok(symbols) => symbols
            .into_iter()
            .filter(|s| s.kind == SymbolKind::Persona)
            .take(settings.persona_limit)
            .collect(),
        Err(e) => {
            warn!(domain = %settings.root_domain, error = %e, "Persona lookup failed");
            Vec::new()
        }
    };
    render_symbols(&mut block, "Persona", &persona);

    // Unattended loop runs only see self-identity
    if kind == SessionKind::Loop {
        return block;
    }

    let identity = search_or_skip(
        provider,
        "identity",
        settings.identity_search_limit,
        &domain_ids,
    )
    .await;
    render_symbols(&mut block, "Identity", &identity);

    let preferences = search_or_skip(
        provider,
        "preference",
        settings.preference_search_limit,
        &domain_ids,
    )
    .await;
    render_symbols(&mut block, "Preferences", &preferences);

    let state = recent_state(
        search_or_skip(provider, "state", settings.state_search_limit, &domain_ids).await,
        settings.state_limit,
    );
    render_symbols(&mut block, "Recent state", &state);

    block
}

async fn search_or_skip(
    provider: &dyn KnowledgeProvider,
    query: &str,
    limit: usize,
    domains: &[String],
) -> Vec<Symbol> {
    match provider.search(query, limit, domains).await {
        Ok(symbols) => symbols,
        Err(e) => {
            warn!(query, error = %e, "Knowledge search failed");
            Vec::new()
        }
    }
}

/// Newest `limit` state symbols by decoded creation time. Symbols whose
/// time cannot be decoded sort last.
fn recent_state(candidates: Vec<Symbol>, limit: usize) -> Vec<Symbol> {
    let mut state: Vec<Symbol> = candidates
        .into_iter()
        .filter(|s| s.kind == SymbolKind::State)
        .collect();
    state.sort_by_key(|s| std::cmp::Reverse(s.creation_time()));
    state.truncate(limit);
    state
}

fn render_domains(out: &mut String, domains: &[DomainMetadata]) {
    if domains.is_empty() {
        return;
    }
    out.push_str("\n## Domains\n");
    for d in domains {
        let _ = write!(out, "- {} ({})", d.name, d.id);
        if !d.description.is_empty() {
            let _ = write!(out, ": {}", d.description);
        }
        let _ = writeln!(out, " [{} symbols]", d.symbol_count);
    }
}

fn render_symbols(out: &mut String, title: &str, symbols: &[Symbol]) {
    if symbols.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n## {title}");
    for s in symbols {
        if s.content.is_empty() {
            let _ = writeln!(out, "- {}", s.name);
        } else {
            let _ = writeln!(out, "- {}: {}", s.name, s.content);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FakeKnowledge, symbol};

    fn catalog() -> FakeKnowledge {
        FakeKnowledge::new()
            .with_domain("root", "Root")
            .with_symbol(symbol("p1", "root", SymbolKind::Persona, "voice", "dry wit"))
            .with_symbol(symbol("c1", "root", SymbolKind::Core, "core rule", "be brief"))
            .with_symbol(symbol("i1", "root", SymbolKind::Identity, "identity card", "Ada"))
            .with_symbol(symbol(
                "pref1",
                "root",
                SymbolKind::Preference,
                "preference tea",
                "green",
            ))
            .with_symbol(symbol(
                "state-1700000000000",
                "root",
                SymbolKind::State,
                "state old",
                "tired",
            ))
            .with_symbol(symbol(
                "state-1800000000000",
                "root",
                SymbolKind::State,
                "state new",
                "rested",
            ))
    }

    #[tokio::test]
    async fn conversation_block_has_every_section() {
        let block =
            build_knowledge_block(&catalog(), SessionKind::Conversation, &Default::default())
                .await;

        assert!(block.contains("## Domains"));
        assert!(block.contains("- Root (root)"));
        assert!(block.contains("## Core"));
        assert!(block.contains("## Persona\n- voice: dry wit"));
        assert!(block.contains("## Identity"));
        assert!(block.contains("## Preferences"));
        assert!(block.contains("## Recent state"));
    }

    #[tokio::test]
    async fn loop_block_is_narrower() {
        let block =
            build_knowledge_block(&catalog(), SessionKind::Loop, &Default::default()).await;

        assert!(block.contains("## Persona"));
        assert!(block.contains("## Core"));
        assert!(!block.contains("## Identity"));
        assert!(!block.contains("## Preferences"));
        assert!(!block.contains("## Recent state"));
    }

    #[tokio::test]
    async fn recent_state_is_newest_first_and_capped() {
        let settings = KnowledgeSettings {
            state_limit: 1,
            ..Default::default()
        };
        let block = build_knowledge_block(&catalog(), SessionKind::Conversation, &settings).await;
        assert!(block.contains("state new"));
        assert!(!block.contains("state old"));
    }

    #[tokio::test]
    async fn catalog_failure_degrades_to_marker() {
        let fake = catalog().failing_domains();
        let block =
            build_knowledge_block(&fake, SessionKind::Conversation, &Default::default()).await;
        assert_eq!(block, KNOWLEDGE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn single_query_failure_is_skipped() {
        let fake = catalog().failing_query("identity");
        let block =
            build_knowledge_block(&fake, SessionKind::Conversation, &Default::default()).await;
        assert!(!block.contains("## Identity"));
        assert!(block.contains("## Preferences"));
    }
}
