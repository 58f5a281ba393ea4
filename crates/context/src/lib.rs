//! # cadence-context
//!
//! Context assembly: builds the token-bounded message sequence for each
//! model invocation from a session's unbounded history and the knowledge
//! catalog.
//!
//! The assembler walks history in **rounds** (a user message plus
//! everything after it up to the next one), newest first, and stops at
//! whichever comes first: the token budget or the round cap.

pub mod assembler;
pub mod knowledge;
pub mod rounds;
pub mod token;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use assembler::{
    AssembledContext, AssemblerSettings, AssemblyError, AssemblyMetadata, ContextAssembler,
    StopReason,
};
pub use knowledge::{KNOWLEDGE_UNAVAILABLE, KnowledgeSettings, build_knowledge_block};
pub use rounds::{Round, partition_rounds, sanitize_round};
pub use token::{CharEstimator, TokenEstimator};
