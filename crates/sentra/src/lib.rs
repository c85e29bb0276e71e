//! Local-first terminal chat over interchangeable inference backends.
//!
//! `sentra` lets a terminal session converse with a locally hosted language
//! model while keeping the conversation inside a fixed token budget. The core
//! abstraction is the [`Orchestrator`](orchestrator::Orchestrator): it picks a
//! backend once at construction, trims the history to the prompt budget and
//! turns the result into a single generation call.
//!
//! # Getting started
//!
//! ```ignore
//! use sentra::prelude::*;
//!
//! fn main() -> sentra::Result<()> {
//!     let config = AppConfig::load("sentra.json")?;
//!     let mut orchestrator = Orchestrator::from_config(config)?;
//!
//!     let history = vec![
//!         Message::system("You are Sentra, a local-first terminal AI assistant."),
//!         Message::user("What is a prefix cache?"),
//!     ];
//!     let result = orchestrator.respond(&history, &mut |piece| print!("{piece}"))?;
//!     println!("\n{:.1} tok/s", result.tokens_per_second);
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Pick or add a backend:** see the [`Runtime`](runtime::Runtime) trait and
//!   its three implementations: [`MockRuntime`](runtime::MockRuntime),
//!   [`LocalBinaryRuntime`](runtime::LocalBinaryRuntime) (external process)
//!   and [`NativeRuntime`](runtime::NativeRuntime) (in-process, with an
//!   incremental prompt cache). Selection lives in [`runtime::selection`].
//!
//! - **Control what fits in the prompt:** see
//!   [`prune_context_window`](context::prune_context_window) and
//!   [`estimate_tokens`](context::estimate_tokens).
//!
//! - **Manage models:** [`ModelDirectory`](models::ModelDirectory) reads the
//!   tab-separated catalog; [`AppState`](state::AppState) remembers the active
//!   model across restarts.
//!
//! - **Persist conversations:** [`SessionStore`](session::SessionStore).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`orchestrator`] | Runtime selection, token budget, profiles, `respond` |
//! | [`context`] | Token estimate and context-window pruning |
//! | [`runtime`] | `Runtime` trait, mock / external-process / native backends |
//! | [`models`] | Model catalog and active-model directory |
//! | [`session`] | Append-only session logs and metadata |
//! | [`config`] | JSON configuration with defaults |
//! | [`logging`] | `tracing` capture layer for the REPL |

pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod prelude;
pub mod profile;
pub mod repl;
pub mod runtime;
pub mod session;
pub mod state;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use error::{ErrorKind, Result, SentraError};

// ── Constants ──────────────────────────────────────────────────────

/// Seed used by the native sampler. Fixed so repeated prompts replay.
pub const DEFAULT_SEED: u32 = 0xFFFF_FFFF;

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single role-tagged turn.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }
}

// ── Generation types ───────────────────────────────────────────────

/// Everything a backend needs for one call. Built fresh per call.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    pub messages: Vec<Message>,
    pub model_id: String,
    pub model_path: PathBuf,
    /// Upper bound on generated tokens.
    pub max_tokens: usize,
}

/// Outcome of one generation call.
///
/// The latency and throughput fields are observability only; nothing in the
/// crate branches on them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerationResult {
    pub text: String,
    /// Set by the orchestrator when pruning dropped history.
    pub context_truncated: bool,
    pub warning: String,
    pub first_token_ms: f64,
    pub total_ms: f64,
    pub generated_tokens: usize,
    pub tokens_per_second: f64,
}

impl GenerationResult {
    /// Format timing stats as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "first token {:.0} ms, total {:.0} ms, {} tokens, {:.1} tok/s",
            self.first_token_ms, self.total_ms, self.generated_tokens, self.tokens_per_second,
        )
    }
}
