//! Token estimation.
//!
//! The budget invariant only needs an estimator that is applied
//! consistently, not one that matches a particular vocabulary. The default
//! is the character heuristic: 1 token ≈ `chars_per_token` bytes, rounded
//! up, accurate within ~10% for common BPE tokenizers on English text.

use cadence_core::message::ContextMessage;

/// Maps text to an integer budget cost.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> usize;
}

/// Byte-length heuristic, default 4 bytes per token.
#[derive(Debug, Clone, Copy)]
pub struct CharEstimator {
    chars_per_token: usize,
}

impl CharEstimator {
    pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for CharEstimator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CHARS_PER_TOKEN)
    }
}

impl TokenEstimator for CharEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.len().div_ceil(self.chars_per_token)
    }
}

/// Cost of one message: the estimator applied to its JSON serialization,
/// so tool calls and metadata are paid for too.
pub fn estimate_message_tokens(estimator: &dyn TokenEstimator, message: &ContextMessage) -> usize {
    let json = serde_json::to_string(message).unwrap_or_default();
    estimator.estimate(&json)
}

/// Cost of a slice of messages.
pub fn estimate_messages_tokens(estimator: &dyn TokenEstimator, messages: &[ContextMessage]) -> usize {
    messages
        .iter()
        .map(|m| estimate_message_tokens(estimator, m))
        .sum()
}
