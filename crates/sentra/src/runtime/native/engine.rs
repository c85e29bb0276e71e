//! Token-level seam between [`NativeRuntime`](super::NativeRuntime) and an
//! inference library.
//!
//! The runtime owns the prompt-cache bookkeeping; an engine only knows how to
//! tokenize, evaluate tokens into its cache, and sample the next token.

use std::path::Path;

use crate::Result;
use crate::profile::SamplingParams;

/// Engine-level token id.
pub type TokenId = i32;

/// A loaded model plus its evaluation state (the KV cache).
///
/// Calls arrive from one thread at a time, under the runtime's lock.
pub trait InferenceEngine: Send {
    /// Tokenize a full prompt, including any beginning-of-sequence marker.
    fn tokenize(&mut self, text: &str) -> Result<Vec<TokenId>>;

    /// Forget every evaluated token.
    fn clear_cache(&mut self);

    /// Evaluate `tokens`, appending them to the cache. The last token's
    /// distribution becomes the one [`sample`](Self::sample) draws from.
    fn feed(&mut self, tokens: &[TokenId]) -> Result<()>;

    /// Start a fresh sampler chain for one generation call.
    fn begin_sampling(&mut self, params: &SamplingParams);

    /// Draw the next token from the latest distribution.
    fn sample(&mut self) -> Result<TokenId>;

    /// Tell the sampler `token` was emitted.
    fn accept(&mut self, token: TokenId);

    fn is_end_of_generation(&self, token: TokenId) -> bool;

    /// Text for `token`. May be empty while a multi-byte character is split
    /// across tokens.
    fn detokenize(&mut self, token: TokenId) -> Result<String>;
}

/// Produces engines for model files.
pub trait EngineLoader: Send + Sync {
    /// `Ok` when the library is usable; otherwise the reason it is not.
    fn check(&self) -> std::result::Result<(), String>;

    fn load(&self, model_path: &Path) -> Result<Box<dyn InferenceEngine>>;
}

/// Loader used when the crate is built without an inference library.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableLoader;

impl EngineLoader for UnavailableLoader {
    fn check(&self) -> std::result::Result<(), String> {
        Err("sentra was built without the `llama` feature".to_string())
    }

    fn load(&self, _model_path: &Path) -> Result<Box<dyn InferenceEngine>> {
        Err(crate::SentraError::runtime_unavailable(
            crate::runtime::NATIVE_RUNTIME_NAME,
            "sentra was built without the `llama` feature",
        ))
    }
}
