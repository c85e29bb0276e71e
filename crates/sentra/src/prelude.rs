//! Convenience re-exports for common `sentra` types.
//!
//! ```ignore
//! use sentra::prelude::*;
//! ```
//!
//! Runtime internals (the native engine seam, selection) are left out;
//! import those from [`crate::runtime`] directly.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{
    ErrorKind, GenerationRequest, GenerationResult, Message, Result, Role, SentraError,
};

// ── Orchestration ───────────────────────────────────────────────────
pub use crate::config::AppConfig;
pub use crate::orchestrator::Orchestrator;
pub use crate::profile::Profile;

// ── Context management ──────────────────────────────────────────────
pub use crate::context::{estimate_tokens, prompt_token_budget, prune_context_window};

// ── Runtimes ────────────────────────────────────────────────────────
pub use crate::runtime::{LocalBinaryRuntime, MockRuntime, NativeRuntime, Runtime};

// ── Persistence ─────────────────────────────────────────────────────
pub use crate::models::{ModelDescriptor, ModelDirectory};
pub use crate::session::SessionStore;
pub use crate::state::AppState;
