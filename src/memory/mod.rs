//! Short-term conversational memory.
//!
//! This module provides:
//! - [`ContextManager`], the per-conversation store of recent turns and
//!   TTL-bound working memory
//! - helpers for formatting history into model prompts
//!
//! Long-term transcript persistence is an external concern; completed turns
//! are handed to a [`crate::agents::TranscriptSink`] when one is configured.

pub mod context_manager;

use crate::types::{Slots, Turn};

pub use context_manager::{ContextManager, ConversationContext, MemoryEntry};

/// Default number of recent turns kept per conversation.
pub const DEFAULT_MAX_TURNS: usize = 20;

/// Number of recent turns included in agent prompts.
pub const PROMPT_HISTORY_WINDOW: usize = 10;

/// Working-memory key prefix for slots carried across turns.
pub const SLOT_KEY_PREFIX: &str = "slot:";

/// Formats the most recent `window` turns as `role: content` lines.
pub fn format_turns_for_prompt(turns: &[Turn], window: usize) -> String {
    truncate_history(turns, window)
        .iter()
        .map(|t| format!("{}: {}", role_label(t), t.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn role_label(turn: &Turn) -> &'static str {
    match turn.role {
        crate::types::MessageRole::System => "system",
        crate::types::MessageRole::User => "user",
        crate::types::MessageRole::Assistant => "assistant",
    }
}

/// The most recent `window` turns.
pub fn truncate_history(history: &[Turn], window: usize) -> &[Turn] {
    &history[history.len().saturating_sub(window)..]
}

/// Working-memory keys for a set of slots.
pub fn slot_memory_entries(slots: &Slots) -> impl Iterator<Item = (String, String)> + '_ {
    slots
        .iter()
        .map(|(k, v)| (format!("{}{}", SLOT_KEY_PREFIX, k), v.clone()))
}
