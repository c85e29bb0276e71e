//! In-process backend with an incremental prompt cache.
//!
//! Chat prompts grow by appending: each turn re-sends the whole history plus
//! one new exchange. [`NativeRuntime`] remembers the token sequence already
//! evaluated (the previous prompt plus every token it generated) and, on the
//! next call, evaluates only the new tail:
//!
//! 1. Tokenize the new prompt.
//! 2. Compute the longest common prefix with the remembered sequence.
//! 3. If the prefix is shorter than the remembered sequence, or covers the
//!    entire new prompt, clear the engine cache and start over.
//! 4. Feed the tokens past the remembered sequence, then sample.
//!
//! Output is identical to a cold run: the engine state before sampling is the
//! same either way, and every call builds a fresh sampler with a fixed seed.
//! Any failure drops the remembered sequence so the next call starts cold.

pub mod engine;
#[cfg(feature = "llama")]
pub mod llama;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info, warn};

use self::engine::{EngineLoader, InferenceEngine, TokenId};
use super::{GenerationClock, NATIVE_RUNTIME_NAME, Runtime, render_prompt};
use crate::config::NativeOptions;
use crate::profile::SamplingParams;
use crate::{GenerationRequest, GenerationResult, Result, SentraError};

/// The `llama-inproc` backend.
pub struct NativeRuntime {
    loader: Box<dyn EngineLoader>,
    sampling: SamplingParams,
    state: Mutex<NativeState>,
}

#[derive(Default)]
struct NativeState {
    engine: Option<Box<dyn InferenceEngine>>,
    loaded_path: Option<PathBuf>,
    /// Tokens currently held in the engine cache, in order.
    cached: Vec<TokenId>,
}

impl NativeRuntime {
    /// Runtime backed by llama.cpp when built with the `llama` feature,
    /// otherwise permanently unavailable.
    pub fn new(options: NativeOptions, sampling: SamplingParams) -> Self {
        #[cfg(feature = "llama")]
        let loader: Box<dyn EngineLoader> = Box::new(llama::LlamaLoader::new(options));
        #[cfg(not(feature = "llama"))]
        let loader: Box<dyn EngineLoader> = {
            let _ = options;
            Box::new(engine::UnavailableLoader)
        };
        Self::with_loader(loader, sampling)
    }

    /// Runtime over a caller-supplied engine loader.
    pub fn with_loader(loader: Box<dyn EngineLoader>, sampling: SamplingParams) -> Self {
        Self {
            loader,
            sampling,
            state: Mutex::new(NativeState::default()),
        }
    }

    pub fn sampling(&self) -> &SamplingParams {
        &self.sampling
    }

    /// Number of tokens currently cached. Zero after a failure or reload.
    pub fn cached_token_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cached
            .len()
    }
}

impl NativeState {
    fn ensure_loaded(&mut self, loader: &dyn EngineLoader, path: &Path) -> Result<()> {
        if self.engine.is_some() && self.loaded_path.as_deref() == Some(path) {
            return Ok(());
        }
        self.engine = None;
        self.loaded_path = None;
        self.cached.clear();

        info!("loading model {}", path.display());
        self.engine = Some(loader.load(path)?);
        self.loaded_path = Some(path.to_path_buf());
        Ok(())
    }

    fn invalidate(&mut self) {
        self.cached.clear();
        if let Some(engine) = self.engine.as_mut() {
            engine.clear_cache();
        }
    }
}

/// Length of the shared leading run of `a` and `b`.
pub fn common_prefix_len(a: &[TokenId], b: &[TokenId]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

impl NativeRuntime {
    fn run(
        &self,
        state: &mut NativeState,
        request: &GenerationRequest,
        on_token: &mut dyn FnMut(&str),
    ) -> Result<GenerationResult> {
        state.ensure_loaded(self.loader.as_ref(), &request.model_path)?;
        let NativeState { engine, cached, .. } = state;
        let engine = engine
            .as_mut()
            .ok_or_else(|| SentraError::generation(NATIVE_RUNTIME_NAME, "no engine loaded"))?;

        let prompt_tokens = engine.tokenize(&render_prompt(&request.messages))?;
        if prompt_tokens.is_empty() {
            return Err(SentraError::generation(
                NATIVE_RUNTIME_NAME,
                "tokenization produced zero tokens",
            ));
        }

        let mut clock = GenerationClock::start();
        let common = common_prefix_len(cached, &prompt_tokens);
        if common < cached.len() || common == prompt_tokens.len() {
            debug!(common, cached = cached.len(), "prompt cache miss");
            engine.clear_cache();
            cached.clear();
        }
        let reused = cached.len();
        // Clear the bookkeeping first so a failed feed leaves nothing stale.
        cached.clear();
        engine.feed(&prompt_tokens[reused..])?;
        *cached = prompt_tokens;
        debug!(reused, fed = cached.len() - reused, "prompt evaluated");

        engine.begin_sampling(&self.sampling);
        let mut text = String::new();
        let mut generated = 0usize;
        for _ in 0..request.max_tokens {
            let token = engine.sample()?;
            if engine.is_end_of_generation(token) {
                break;
            }
            engine.accept(token);
            generated += 1;

            let piece = engine.detokenize(token)?;
            if !piece.is_empty() {
                clock.mark_fragment();
                text.push_str(&piece);
                on_token(&piece);
            }

            engine.feed(&[token])?;
            cached.push(token);
        }

        Ok(clock.finish(text, generated))
    }
}

impl Runtime for NativeRuntime {
    fn name(&self) -> &str {
        NATIVE_RUNTIME_NAME
    }

    fn is_available(&self) -> bool {
        match self.loader.check() {
            Ok(()) => true,
            Err(reason) => {
                debug!("llama-inproc unavailable: {reason}");
                false
            }
        }
    }

    fn generate(
        &self,
        request: &GenerationRequest,
        on_token: &mut dyn FnMut(&str),
    ) -> Result<GenerationResult> {
        if let Err(reason) = self.loader.check() {
            return Err(SentraError::runtime_unavailable(NATIVE_RUNTIME_NAME, reason));
        }
        if request.model_path.as_os_str().is_empty() {
            return Err(SentraError::generation(
                NATIVE_RUNTIME_NAME,
                "requires a non-empty model_path",
            ));
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let result = self.run(&mut state, request, on_token);
        if let Err(e) = &result {
            warn!("llama-inproc call failed, dropping prompt cache: {e}");
            state.invalidate();
        }
        result
    }
}
