//! `cadence context preview` — Assemble a context from files on disk.

use crate::app::{self, CliResult};
use crate::snapshot::{KnowledgeSnapshot, Transcript};
use cadence_config::AppConfig;
use cadence_context::{CharEstimator, ContextAssembler};
use cadence_core::message::Role;
use std::path::Path;
use std::sync::Arc;

const PREVIEW_CHARS: usize = 100;

pub async fn preview(
    config: &AppConfig,
    transcript: &Path,
    knowledge: Option<&Path>,
    system: Option<String>,
    json: bool,
) -> CliResult {
    let transcript = Transcript::load(transcript).await?;
    let session_id = transcript.session_id().to_string();
    let knowledge = match knowledge {
        Some(path) => KnowledgeSnapshot::load(path).await?,
        None => KnowledgeSnapshot::default(),
    };

    let assembler = ContextAssembler::new(
        Arc::new(transcript),
        Arc::new(knowledge),
        Arc::new(CharEstimator::new(config.context.chars_per_token)),
        app::assembler_settings(&config.context),
    );
    let system_prompt = system.unwrap_or_else(|| config.base_system_prompt.clone());
    let assembled = assembler.build(&session_id, &system_prompt).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&assembled.messages)?);
        return Ok(());
    }

    let meta = &assembled.metadata;
    println!("🧩 Context for '{session_id}' ({:?})", meta.session_kind);
    println!(
        "   Rounds:    {} of {} included ({:?})",
        meta.rounds_included, meta.rounds_available, meta.stop_reason
    );
    println!("   Tokens:    {} of {} budget", meta.history_tokens, meta.budget);
    if !meta.session_found {
        println!("   ⚠️  Session metadata missing; treated as a conversation");
    }
    println!("{:-<72}", "");
    for msg in &assembled.messages {
        let role = match msg.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        let first_line = msg.content.lines().next().unwrap_or_default();
        let shown: String = first_line.chars().take(PREVIEW_CHARS).collect();
        println!("  {role:<9} {shown}");
    }
    Ok(())
}
