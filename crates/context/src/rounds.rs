//! Round partitioning and sanitization.
//!
//! A round is the unit of inclusion: everything from one user message up
//! to (not including) the next. History is partitioned newest-first so the
//! assembler can walk it from the live exchange backwards.

use cadence_core::message::{ContextMessage, Role};
use std::collections::HashSet;

/// A contiguous slice of history, in chronological order.
pub type Round = Vec<ContextMessage>;

/// Split `history` (chronological) into rounds, newest round first.
///
/// Scanning from the newest message, a round closes once it has taken in a
/// user message. Messages older than the oldest user message form one
/// final round of their own.
pub fn partition_rounds(history: Vec<ContextMessage>) -> Vec<Round> {
    let mut rounds = Vec::new();
    let mut current: Round = Vec::new();

    for message in history.into_iter().rev() {
        let closes = message.is_user();
        current.push(message);
        if closes {
            current.reverse();
            rounds.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        current.reverse();
        rounds.push(current);
    }

    rounds
}

/// Whether a tool-result message records a failed call.
///
/// Recognised markers: `metadata.is_error == true`,
/// `metadata.status == "error"`, or content beginning with "error".
pub fn is_error_result(message: &ContextMessage) -> bool {
    if message.role != Role::Tool {
        return false;
    }
    if message
        .metadata
        .get("is_error")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        return true;
    }
    if message
        .metadata
        .get("status")
        .and_then(|v| v.as_str())
        .is_some_and(|s| s.eq_ignore_ascii_case("error"))
    {
        return true;
    }
    let head: String = message.content.trim_start().chars().take(5).collect();
    head.eq_ignore_ascii_case("error")
}

/// Remove failed tool exchanges from an older round.
///
/// Error results are dropped, the matching calls are stripped from the
/// assistant message that issued them, and an assistant message left with
/// neither text nor calls is dropped as well.
pub fn sanitize_round(round: Round) -> Round {
    let failed: HashSet<String> = round
        .iter()
        .filter(|m| is_error_result(m))
        .filter_map(|m| m.tool_call_id.clone())
        .collect();

    round
        .into_iter()
        .filter(|m| !is_error_result(m))
        .filter_map(|mut m| {
            if m.role != Role::Assistant || failed.is_empty() || m.tool_calls.is_empty() {
                return Some(m);
            }
            let before = m.tool_calls.len();
            m.tool_calls.retain(|call| !failed.contains(&call.id));
            let stripped = m.tool_calls.len() < before;
            if stripped && m.tool_calls.is_empty() && m.content.trim().is_empty() {
                None
            } else {
                Some(m)
            }
        })
        .collect()
}
