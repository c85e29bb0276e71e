//! Inference backends behind one capability.
//!
//! The [`Runtime`] trait is the seam between the orchestrator and whatever
//! actually produces text. Three implementations ship with the crate:
//!
//! | Name | Type | Notes |
//! |------|------|-------|
//! | `llama-inproc` | [`NativeRuntime`] | in-process llama.cpp with an incremental prompt cache |
//! | `local-binary` | [`LocalBinaryRuntime`] | runs a shell command template to completion |
//! | `mock` | [`MockRuntime`] | deterministic echo, always available |
//!
//! Adding a backend means implementing one trait and appending it to the list
//! handed to the orchestrator. Selection is in [`selection`].

pub mod mock;
pub mod native;
pub mod process;
pub mod selection;

use std::time::Instant;

use crate::config::AppConfig;
use crate::{GenerationRequest, GenerationResult, Message, Result};

pub use mock::MockRuntime;
pub use native::NativeRuntime;
pub use process::LocalBinaryRuntime;
pub use selection::RuntimeSelection;

pub const MOCK_RUNTIME_NAME: &str = "mock";
pub const LOCAL_BINARY_RUNTIME_NAME: &str = "local-binary";
pub const NATIVE_RUNTIME_NAME: &str = "llama-inproc";

/// One generation backend.
///
/// Implementations are long-lived and may hold mutable state behind interior
/// locking; at most one `generate` runs per instance at a time.
pub trait Runtime: Send + Sync {
    /// Stable name used for selection and session metadata.
    fn name(&self) -> &str;

    /// Whether this backend can serve calls. Construction problems surface
    /// here as `false` rather than as panics.
    fn is_available(&self) -> bool;

    /// Run one generation call, passing each non-empty text fragment to
    /// `on_token` in order on the calling thread.
    fn generate(
        &self,
        request: &GenerationRequest,
        on_token: &mut dyn FnMut(&str),
    ) -> Result<GenerationResult>;
}

/// The built-in backends in selection order: native, external process, mock.
pub fn default_runtimes(config: &AppConfig) -> Vec<Box<dyn Runtime>> {
    vec![
        Box::new(NativeRuntime::new(
            config.native.clone(),
            config.starting_profile().sampling(),
        )),
        Box::new(LocalBinaryRuntime::new(config.local_command_template.clone())),
        Box::new(MockRuntime),
    ]
}

// ── Prompt rendering ───────────────────────────────────────────────

/// Render messages as `role: content` lines followed by an open
/// `assistant: ` turn.
pub fn render_prompt(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for msg in messages {
        prompt.push_str(&format!("{}: {}\n", msg.role, msg.content));
    }
    prompt.push_str("assistant: ");
    prompt
}

/// Quote `value` for POSIX `sh` using single quotes.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

// ── Timing ─────────────────────────────────────────────────────────

/// Collects first-token and total latency for a [`GenerationResult`].
#[derive(Debug)]
pub(crate) struct GenerationClock {
    start: Instant,
    first_token_ms: Option<f64>,
}

impl GenerationClock {
    pub(crate) fn start() -> Self {
        Self {
            start: Instant::now(),
            first_token_ms: None,
        }
    }

    fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Record that a fragment was emitted. Only the first call matters.
    pub(crate) fn mark_fragment(&mut self) {
        if self.first_token_ms.is_none() {
            self.first_token_ms = Some(self.elapsed_ms());
        }
    }

    pub(crate) fn finish(self, text: String, generated_tokens: usize) -> GenerationResult {
        let total_ms = self.elapsed_ms();
        let tokens_per_second = if total_ms > 0.0 {
            generated_tokens as f64 * 1000.0 / total_ms
        } else {
            0.0
        };
        GenerationResult {
            text,
            first_token_ms: self.first_token_ms.unwrap_or(0.0),
            total_ms,
            generated_tokens,
            tokens_per_second,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_prompt_prefixes_roles() {
        let prompt = render_prompt(&[Message::system("be nice"), Message::user("hi")]);
        assert_eq!(prompt, "system: be nice\nuser: hi\nassistant: ");
        assert_eq!(render_prompt(&[]), "assistant: ");
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn default_runtimes_order() {
        let runtimes = default_runtimes(&AppConfig::default());
        let names: Vec<&str> = runtimes.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["llama-inproc", "local-binary", "mock"]);
    }

    #[test]
    fn clock_without_fragments_reports_zero_first_token() {
        let clock = GenerationClock::start();
        let result = clock.finish("x".into(), 0);
        assert_eq!(result.first_token_ms, 0.0);
        assert_eq!(result.tokens_per_second, 0.0);
        assert_eq!(result.text, "x");
    }
}
