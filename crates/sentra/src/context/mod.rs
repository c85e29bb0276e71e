//! Context window management.
//!
//! The prompt a backend sees is bounded by the model's context window minus
//! the tokens reserved for the reply. [`budget`] estimates message cost and
//! decides which turns of the history survive into the next prompt:
//!
//! - **System messages are pinned.** They always survive, in order, even when
//!   they alone exceed the budget.
//! - **Recent turns win.** Non-system messages are considered newest first;
//!   any that would overflow is skipped while older, cheaper ones may still
//!   fit.

pub mod budget;

pub use budget::{PruneResult, estimate_tokens, prompt_token_budget, prune_context_window};
