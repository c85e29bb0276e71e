//! Token estimate and context-window pruning.
//!
//! Cost is a whitespace word count. It is deliberately tokenizer-agnostic so
//! the same budget applies to every backend; real tokenizers usually produce
//! more tokens than words, which the reply reserve absorbs.

use crate::Message;
use tracing::debug;

/// Estimated token cost of `text`: its whitespace-delimited word count.
///
/// Empty text costs 0. Non-empty text costs at least 1, so a message made of
/// nothing but whitespace still occupies a slot.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.split_whitespace().count().max(1)
}

/// Tokens left for the prompt once `max_tokens` is reserved for the reply.
pub fn prompt_token_budget(context_window_tokens: usize, max_tokens: usize) -> usize {
    context_window_tokens.saturating_sub(max_tokens)
}

/// Outcome of [`prune_context_window`]. Recomputed every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneResult {
    /// Surviving messages in original chronological order.
    pub messages: Vec<Message>,
    /// True iff at least one input message was dropped.
    pub truncated: bool,
    /// Estimated cost of `messages`.
    pub tokens_kept: usize,
}

impl PruneResult {
    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "context: kept {} messages (~{} tokens){}",
            self.messages.len(),
            self.tokens_kept,
            if self.truncated { ", truncated" } else { "" },
        )
    }
}

/// Reduce `history` to a subset whose estimated cost fits `budget`.
///
/// System messages are charged first and always kept, even past the budget.
/// The remaining messages are walked newest to oldest; each is kept if it
/// still fits and skipped otherwise, without ending the walk.
pub fn prune_context_window(history: &[Message], budget: usize) -> PruneResult {
    let mut keep = vec![false; history.len()];
    let mut used = 0usize;

    for (i, msg) in history.iter().enumerate() {
        if msg.is_system() {
            keep[i] = true;
            used += estimate_tokens(&msg.content);
        }
    }

    let mut truncated = false;
    for (i, msg) in history.iter().enumerate().rev() {
        if msg.is_system() {
            continue;
        }
        let cost = estimate_tokens(&msg.content);
        if used + cost <= budget {
            keep[i] = true;
            used += cost;
        } else {
            truncated = true;
        }
    }

    let messages: Vec<Message> = history
        .iter()
        .zip(&keep)
        .filter(|(_, kept)| **kept)
        .map(|(msg, _)| msg.clone())
        .collect();

    let result = PruneResult {
        messages,
        truncated,
        tokens_kept: used,
    };
    if truncated {
        debug!(budget, "{}", result.to_log_string());
    }
    result
}
