//! llama.cpp engine through the `llama-cpp-2` bindings.
//!
//! A llama context borrows its model, and neither handle may move between
//! threads. Each loaded model therefore gets a worker thread that owns both,
//! with the context borrowing the model on that thread's stack. The
//! [`LlamaEngine`] handed to the runtime is a plain channel pair: every
//! engine call becomes one [`Op`] sent to the worker and one [`Reply`] back.
//! Dropping the engine closes the channel and the worker frees the model.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;
use tracing::{debug, warn};

use super::engine::{EngineLoader, InferenceEngine, TokenId};
use crate::config::NativeOptions;
use crate::profile::SamplingParams;
use crate::runtime::NATIVE_RUNTIME_NAME;
use crate::{Result, SentraError};

/// Process-wide backend. llama.cpp must be initialized exactly once.
static BACKEND: OnceLock<std::result::Result<LlamaBackend, String>> = OnceLock::new();

fn backend() -> std::result::Result<&'static LlamaBackend, String> {
    BACKEND
        .get_or_init(|| {
            let mut backend = LlamaBackend::init().map_err(|e| e.to_string())?;
            backend.void_logs();
            debug!("llama backend initialized");
            Ok(backend)
        })
        .as_ref()
        .map_err(Clone::clone)
}

fn engine_error(message: impl Into<String>) -> SentraError {
    SentraError::generation(NATIVE_RUNTIME_NAME, message)
}

fn context_params(options: &NativeOptions) -> LlamaContextParams {
    let n_batch = if options.n_batch > 0 {
        options.n_batch
    } else {
        512
    };
    let mut params = LlamaContextParams::default()
        .with_n_ctx(NonZeroU32::new(options.n_ctx))
        .with_n_batch(n_batch)
        .with_n_ubatch(n_batch)
        .with_offload_kqv(options.offload_kqv);
    if options.n_threads > 0 {
        params = params.with_n_threads(options.n_threads);
    }
    if options.n_threads_batch > 0 {
        params = params.with_n_threads_batch(options.n_threads_batch);
    }
    params
}

// ── Protocol ───────────────────────────────────────────────────────

/// One engine call, sent to the worker.
#[derive(Debug)]
enum Op {
    Tokenize(String),
    ClearCache,
    Feed(Vec<TokenId>),
    BeginSampling(SamplingParams),
    Sample,
    Accept(TokenId),
    IsEndOfGeneration(TokenId),
    Detokenize(TokenId),
}

/// The worker's answer to one [`Op`]. The first reply after spawning
/// reports the load outcome.
#[derive(Debug)]
enum Reply {
    Done,
    Tokens(Vec<TokenId>),
    Token(TokenId),
    Flag(bool),
    Text(String),
    Failed(String),
}

// ── Loader ─────────────────────────────────────────────────────────

/// Loads GGUF model files onto worker threads.
#[derive(Debug, Clone)]
pub struct LlamaLoader {
    options: NativeOptions,
}

impl LlamaLoader {
    pub fn new(options: NativeOptions) -> Self {
        Self { options }
    }
}

impl EngineLoader for LlamaLoader {
    fn check(&self) -> std::result::Result<(), String> {
        backend().map(|_| ())
    }

    fn load(&self, model_path: &Path) -> Result<Box<dyn InferenceEngine>> {
        let backend =
            backend().map_err(|e| SentraError::runtime_unavailable(NATIVE_RUNTIME_NAME, e))?;

        let (op_tx, op_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        let path = model_path.to_path_buf();
        let options = self.options.clone();
        thread::Builder::new()
            .name("llama-engine".to_string())
            .spawn(move || serve(backend, path, &options, op_rx, reply_tx))
            .map_err(|e| engine_error(format!("failed to spawn engine thread: {e}")))?;

        let engine = LlamaEngine {
            ops: op_tx,
            replies: reply_rx,
        };
        match engine.receive()? {
            Reply::Done => Ok(Box::new(engine)),
            other => Err(unexpected(&other)),
        }
    }
}

// ── Worker ─────────────────────────────────────────────────────────

/// Worker thread body: load, report, then answer ops until the engine drops.
fn serve(
    backend: &LlamaBackend,
    path: PathBuf,
    options: &NativeOptions,
    ops: Receiver<Op>,
    replies: Sender<Reply>,
) {
    let model = match LlamaModel::load_from_file(backend, &path, &LlamaModelParams::default()) {
        Ok(model) => model,
        Err(e) => {
            let message = format!("failed to load model file {}: {e}", path.display());
            let _ = replies.send(Reply::Failed(message));
            return;
        }
    };
    let ctx = match model.new_context(backend, context_params(options)) {
        Ok(ctx) => ctx,
        Err(e) => {
            let _ = replies.send(Reply::Failed(format!("failed to create context: {e}")));
            return;
        }
    };

    let mut worker = Worker {
        model: &model,
        n_batch: ctx.n_batch().max(1) as usize,
        ctx,
        sampler: None,
        decoder: encoding_rs::UTF_8.new_decoder(),
    };
    if replies.send(Reply::Done).is_err() {
        return;
    }
    debug!("llama engine ready: {}", path.display());

    for op in ops {
        if replies.send(worker.handle(op)).is_err() {
            break;
        }
    }
    debug!("llama engine stopped: {}", path.display());
}

struct Worker<'m> {
    model: &'m LlamaModel,
    ctx: LlamaContext<'m>,
    sampler: Option<LlamaSampler>,
    decoder: encoding_rs::Decoder,
    n_batch: usize,
}

impl Worker<'_> {
    fn handle(&mut self, op: Op) -> Reply {
        let outcome = match op {
            Op::Tokenize(text) => self
                .model
                .str_to_token(&text, AddBos::Always)
                .map(|tokens| Reply::Tokens(tokens.into_iter().map(|t| t.0).collect()))
                .map_err(|e| format!("tokenization failed: {e}")),
            Op::ClearCache => {
                self.ctx.clear_kv_cache();
                Ok(Reply::Done)
            }
            Op::Feed(tokens) => self.feed(&tokens).map(|()| Reply::Done),
            Op::BeginSampling(params) => {
                self.sampler = Some(LlamaSampler::chain_simple([
                    LlamaSampler::top_k(params.top_k),
                    LlamaSampler::top_p(params.top_p, 1),
                    LlamaSampler::temp(params.temperature),
                    LlamaSampler::dist(params.seed),
                ]));
                self.decoder = encoding_rs::UTF_8.new_decoder();
                Ok(Reply::Done)
            }
            Op::Sample => match self.sampler.as_mut() {
                Some(sampler) => Ok(Reply::Token(sampler.sample(&self.ctx, -1).0)),
                None => Err("sample called before begin_sampling".to_string()),
            },
            Op::Accept(token) => {
                if let Some(sampler) = self.sampler.as_mut() {
                    sampler.accept(LlamaToken::new(token));
                }
                Ok(Reply::Done)
            }
            Op::IsEndOfGeneration(token) => {
                Ok(Reply::Flag(self.model.is_eog_token(LlamaToken::new(token))))
            }
            Op::Detokenize(token) => self
                .model
                .token_to_piece(LlamaToken::new(token), &mut self.decoder, true, None)
                .map(Reply::Text)
                .map_err(|e| format!("failed to decode token: {e}")),
        };
        outcome.unwrap_or_else(Reply::Failed)
    }

    fn feed(&mut self, tokens: &[TokenId]) -> std::result::Result<(), String> {
        let tokens: Vec<LlamaToken> = tokens.iter().copied().map(LlamaToken::new).collect();
        for chunk in tokens.chunks(self.n_batch) {
            let mut batch =
                LlamaBatch::get_one(chunk).map_err(|e| format!("failed to create batch: {e}"))?;
            self.ctx
                .decode(&mut batch)
                .map_err(|e| format!("decode failed: {e}"))?;
        }
        Ok(())
    }
}

// ── Engine handle ──────────────────────────────────────────────────

/// Handle to a model loaded on its worker thread.
pub struct LlamaEngine {
    ops: Sender<Op>,
    replies: Receiver<Reply>,
}

fn unexpected(reply: &Reply) -> SentraError {
    engine_error(format!("unexpected engine reply: {reply:?}"))
}

impl LlamaEngine {
    fn receive(&self) -> Result<Reply> {
        match self.replies.recv() {
            Ok(Reply::Failed(message)) => Err(engine_error(message)),
            Ok(reply) => Ok(reply),
            Err(_) => Err(engine_error("engine thread stopped")),
        }
    }

    fn call(&self, op: Op) -> Result<Reply> {
        self.ops
            .send(op)
            .map_err(|_| engine_error("engine thread stopped"))?;
        self.receive()
    }

    /// For calls the engine trait cannot fail.
    fn call_logged(&self, op: Op) {
        match self.call(op) {
            Ok(Reply::Done) => {}
            Ok(other) => warn!("{}", unexpected(&other)),
            Err(e) => warn!("{e}"),
        }
    }
}

impl InferenceEngine for LlamaEngine {
    fn tokenize(&mut self, text: &str) -> Result<Vec<TokenId>> {
        match self.call(Op::Tokenize(text.to_string()))? {
            Reply::Tokens(tokens) => Ok(tokens),
            other => Err(unexpected(&other)),
        }
    }

    fn clear_cache(&mut self) {
        self.call_logged(Op::ClearCache);
    }

    fn feed(&mut self, tokens: &[TokenId]) -> Result<()> {
        match self.call(Op::Feed(tokens.to_vec()))? {
            Reply::Done => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    fn begin_sampling(&mut self, params: &SamplingParams) {
        self.call_logged(Op::BeginSampling(*params));
    }

    fn sample(&mut self) -> Result<TokenId> {
        match self.call(Op::Sample)? {
            Reply::Token(token) => Ok(token),
            other => Err(unexpected(&other)),
        }
    }

    fn accept(&mut self, token: TokenId) {
        self.call_logged(Op::Accept(token));
    }

    /// A lost worker reads as end of generation; the next call reports it.
    fn is_end_of_generation(&self, token: TokenId) -> bool {
        match self.call(Op::IsEndOfGeneration(token)) {
            Ok(Reply::Flag(eog)) => eog,
            Ok(other) => {
                warn!("{}", unexpected(&other));
                true
            }
            Err(e) => {
                warn!("{e}");
                true
            }
        }
    }

    fn detokenize(&mut self, token: TokenId) -> Result<String> {
        match self.call(Op::Detokenize(token))? {
            Reply::Text(piece) => Ok(piece),
            other => Err(unexpected(&other)),
        }
    }
}
