//! Context assembly pipeline.
//!
//! Produces the message sequence for one model invocation:
//!
//! 1. **System** prompt, verbatim
//! 2. **Knowledge** block built from catalog queries (never fails the build)
//! 3. **Boundary** marker separating the static prefix from history
//! 4. **History** rounds, newest-first until the budget or round cap is hit,
//!    then emitted chronologically
//!
//! Only the newest round is kept verbatim; older rounds are sanitized of
//! failed tool exchanges before being costed.

use crate::knowledge::{KnowledgeSettings, build_knowledge_block};
use crate::rounds::{Round, partition_rounds, sanitize_round};
use crate::token::{TokenEstimator, estimate_messages_tokens};
use cadence_core::error::SessionError;
use cadence_core::knowledge::KnowledgeProvider;
use cadence_core::message::ContextMessage;
use cadence_core::session::{SessionHistoryProvider, SessionKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Metadata key identifying the synthetic boundary message.
pub const BOUNDARY_KIND: &str = "context_boundary";

const BOUNDARY_TEXT: &str = "[conversation history follows]";

/// Assembler limits.
#[derive(Debug, Clone)]
pub struct AssemblerSettings {
    /// Maximum estimated tokens of accepted history
    pub history_token_budget: usize,
    /// Maximum rounds considered, regardless of budget
    pub max_rounds: usize,
    pub knowledge: KnowledgeSettings,
}

impl Default for AssemblerSettings {
    fn default() -> Self {
        Self {
            history_token_budget: 12_000,
            max_rounds: 10,
            knowledge: KnowledgeSettings::default(),
        }
    }
}

/// Why history inclusion stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every round fit
    Exhausted,
    /// The next round would have exceeded the budget
    Budget,
    /// The round cap was reached
    RoundCap,
}

/// Details about one build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyMetadata {
    pub session_kind: SessionKind,
    /// Whether the history provider knew the session
    pub session_found: bool,
    pub rounds_available: usize,
    pub rounds_included: usize,
    /// Estimated tokens of accepted history
    pub history_tokens: usize,
    pub budget: usize,
    pub stop_reason: StopReason,
}

/// The assembled sequence plus build metadata.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub messages: Vec<ContextMessage>,
    pub metadata: AssemblyMetadata,
}

/// Errors from context assembly.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("Session lookup failed: {0}")]
    SessionLookup(SessionError),

    #[error("History fetch failed: {0}")]
    History(SessionError),
}

/// The context assembler. Holds no per-session state; share one instance.
pub struct ContextAssembler {
    sessions: Arc<dyn SessionHistoryProvider>,
    knowledge: Arc<dyn KnowledgeProvider>,
    estimator: Arc<dyn TokenEstimator>,
    settings: AssemblerSettings,
}

impl ContextAssembler {
    pub fn new(
        sessions: Arc<dyn SessionHistoryProvider>,
        knowledge: Arc<dyn KnowledgeProvider>,
        estimator: Arc<dyn TokenEstimator>,
        settings: AssemblerSettings,
    ) -> Self {
        Self {
            sessions,
            knowledge,
            estimator,
            settings,
        }
    }

    pub fn settings(&self) -> &AssemblerSettings {
        &self.settings
    }

    /// Assemble the message sequence for `session_id`.
    ///
    /// Session lookup and history fetch failures propagate; an unknown
    /// session is treated as a conversation.
    pub async fn build(
        &self,
        session_id: &str,
        system_prompt: &str,
    ) -> Result<AssembledContext, AssemblyError> {
        let session = self
            .sessions
            .get_session(session_id)
            .await
            .map_err(AssemblyError::SessionLookup)?;
        let session_found = session.is_some();
        let kind = session.map(|s| s.kind).unwrap_or_default();

        let knowledge =
            build_knowledge_block(self.knowledge.as_ref(), kind, &self.settings.knowledge).await;

        let history = self
            .sessions
            .get_history(session_id)
            .await
            .map_err(AssemblyError::History)?;

        let rounds = partition_rounds(history);
        let rounds_available = rounds.len();
        let (accepted, history_tokens, stop_reason) = self.select_rounds(rounds);
        let rounds_included = accepted.len();

        let mut messages = Vec::with_capacity(3 + accepted.iter().map(Vec::len).sum::<usize>());
        messages.push(ContextMessage::system(system_prompt));
        messages.push(ContextMessage::system(knowledge));
        messages.push(
            ContextMessage::system(BOUNDARY_TEXT)
                .with_metadata("kind", serde_json::json!(BOUNDARY_KIND)),
        );
        messages.extend(accepted.into_iter().flatten());

        debug!(
            session_id,
            ?kind,
            rounds_available,
            rounds_included,
            history_tokens,
            budget = self.settings.history_token_budget,
            ?stop_reason,
            "Context assembled"
        );

        Ok(AssembledContext {
            messages,
            metadata: AssemblyMetadata {
                session_kind: kind,
                session_found,
                rounds_available,
                rounds_included,
                history_tokens,
                budget: self.settings.history_token_budget,
                stop_reason,
            },
        })
    }

    /// Walk rounds newest-first, returning the accepted rounds in
    /// chronological order with their total cost.
    fn select_rounds(&self, rounds: Vec<Round>) -> (Vec<Round>, usize, StopReason) {
        let budget = self.settings.history_token_budget;
        let mut accepted: Vec<Round> = Vec::new();
        let mut total = 0usize;
        let mut stop = StopReason::Exhausted;

        for (index, round) in rounds.into_iter().enumerate() {
            if index >= self.settings.max_rounds {
                stop = StopReason::RoundCap;
                break;
            }
            let round = if index == 0 { round } else { sanitize_round(round) };
            let cost = estimate_messages_tokens(self.estimator.as_ref(), &round);
            if total + cost > budget {
                stop = StopReason::Budget;
                break;
            }
            total += cost;
            accepted.push(round);
        }

        accepted.reverse();
        (accepted, total, stop)
    }
}
