//! Deterministic echo backend for demos and tests.

use super::{GenerationClock, MOCK_RUNTIME_NAME, Runtime};
use crate::{GenerationRequest, GenerationResult, Result, Role};

/// Echoes the last user message. Always available.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockRuntime;

impl MockRuntime {
    /// The reply `generate` produces for `request`.
    pub fn reply_for(request: &GenerationRequest) -> String {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map_or("", |m| m.content.as_str());
        format!(
            "[MOCK] Sentra received: {last_user} | This is a local-first scaffold. \
             Connect a real runtime via config."
        )
    }
}

impl Runtime for MockRuntime {
    fn name(&self) -> &str {
        MOCK_RUNTIME_NAME
    }

    fn is_available(&self) -> bool {
        true
    }

    fn generate(
        &self,
        request: &GenerationRequest,
        on_token: &mut dyn FnMut(&str),
    ) -> Result<GenerationResult> {
        let mut clock = GenerationClock::start();
        let text = Self::reply_for(request);
        let mut buf = [0u8; 4];
        let mut count = 0;
        for ch in text.chars() {
            clock.mark_fragment();
            on_token(&*ch.encode_utf8(&mut buf));
            count += 1;
        }
        Ok(clock.finish(text, count))
    }
}
