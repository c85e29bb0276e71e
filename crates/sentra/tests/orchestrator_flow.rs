//! End-to-end orchestrator behaviour with scripted backends.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sentra::config::AppConfig;
use sentra::models::{ModelDescriptor, ModelDirectory};
use sentra::orchestrator::Orchestrator;
use sentra::profile::{Profile, SamplingParams};
use sentra::runtime::native::engine::{EngineLoader, InferenceEngine, TokenId};
use sentra::runtime::{MockRuntime, NativeRuntime, Runtime};
use sentra::state::AppState;
use sentra::{ErrorKind, GenerationRequest, GenerationResult, Message, Result, SentraError};

// ── Scripted runtime ───────────────────────────────────────────────

#[derive(Clone, Default)]
struct Recorder {
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<GenerationRequest>>>,
}

struct ScriptedRuntime {
    name: &'static str,
    available: bool,
    reply: &'static str,
    recorder: Recorder,
}

impl ScriptedRuntime {
    fn new(name: &'static str, available: bool, recorder: &Recorder) -> Self {
        Self {
            name,
            available,
            reply: "ok",
            recorder: recorder.clone(),
        }
    }
}

impl Runtime for ScriptedRuntime {
    fn name(&self) -> &str {
        self.name
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn generate(
        &self,
        request: &GenerationRequest,
        on_token: &mut dyn FnMut(&str),
    ) -> Result<GenerationResult> {
        self.recorder.calls.fetch_add(1, Ordering::SeqCst);
        self.recorder.requests.lock().unwrap().push(request.clone());
        on_token(self.reply);
        Ok(GenerationResult {
            text: self.reply.to_string(),
            generated_tokens: 1,
            ..Default::default()
        })
    }
}

// ── Fixture ────────────────────────────────────────────────────────

struct Workspace {
    dir: tempfile::TempDir,
    config: AppConfig,
}

impl Workspace {
    /// A data root with one ready model `a` and one missing model `b`.
    fn new(preference: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::default()
            .with_data_root(dir.path())
            .with_runtime_preference(preference);
        std::fs::write(dir.path().join("a.gguf"), b"gguf").unwrap();
        std::fs::write(
            &config.models_file,
            format!(
                "# id\tname\trepo\tfile\tpath\n\
                 a\tModel A\trepo/a\ta.gguf\t{}\n\
                 b\tModel B\trepo/b\tb.gguf\t{}\n",
                dir.path().join("a.gguf").display(),
                dir.path().join("b.gguf").display()
            ),
        )
        .unwrap();
        Self { dir, config }
    }

    fn orchestrator(&self, runtimes: Vec<Box<dyn Runtime>>) -> Orchestrator {
        let models = ModelDirectory::load_from_tsv(&self.config.models_file, None).unwrap();
        let state = AppState::new(&self.config.state_file);
        Orchestrator::new(self.config.clone(), models, state, runtimes)
    }
}

// ── Selection ──────────────────────────────────────────────────────

#[test]
fn preferred_runtime_wins_when_available() {
    let ws = Workspace::new("second");
    let rec = Recorder::default();
    let o = ws.orchestrator(vec![
        Box::new(ScriptedRuntime::new("first", true, &rec)),
        Box::new(ScriptedRuntime::new("second", true, &rec)),
    ]);
    assert_eq!(o.active_runtime_name(), "second");
    assert!(o.runtime_selection_note().is_empty());
}

#[test]
fn falls_back_to_first_available_with_note() {
    let ws = Workspace::new("llama-inproc");
    let rec = Recorder::default();
    let o = ws.orchestrator(vec![
        Box::new(ScriptedRuntime::new("llama-inproc", false, &rec)),
        Box::new(ScriptedRuntime::new("local-binary", false, &rec)),
        Box::new(MockRuntime),
    ]);
    assert_eq!(o.active_runtime_name(), "mock");
    assert!(o.runtime_selection_note().contains("llama-inproc"));
}

#[test]
fn nothing_available_fails_every_call() {
    let ws = Workspace::new("mock");
    let rec = Recorder::default();
    let mut o = ws.orchestrator(vec![Box::new(ScriptedRuntime::new("x", false, &rec))]);
    assert_eq!(o.active_runtime_name(), "none");
    let err = o.respond(&[Message::user("hi")], &mut |_| {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(rec.calls.load(Ordering::SeqCst), 0);
}

// ── respond ────────────────────────────────────────────────────────

#[test]
fn missing_model_file_never_reaches_runtime() {
    let ws = Workspace::new("rec");
    let rec = Recorder::default();
    let mut o = ws.orchestrator(vec![Box::new(ScriptedRuntime::new("rec", true, &rec))]);
    o.set_active_model("b").unwrap();

    let err = o.respond(&[Message::user("hi")], &mut |_| {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModelFile);
    assert!(err.to_string().contains("b.gguf"));
    assert_eq!(rec.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn request_carries_pruned_history_and_model() {
    let ws = Workspace::new("rec");
    let rec = Recorder::default();
    let mut o = ws.orchestrator(vec![Box::new(ScriptedRuntime::new("rec", true, &rec))]);
    o.set_context_window_tokens(64);
    o.set_max_tokens(58);
    assert_eq!(o.prompt_token_budget(), 6);

    let history = vec![
        Message::system("stay terse"),
        Message::user("one two three four five"),
        Message::assistant("six seven"),
        Message::user("eight nine"),
    ];
    let mut streamed = String::new();
    let result = o.respond(&history, &mut |p| streamed.push_str(p)).unwrap();
    assert_eq!(streamed, "ok");
    assert!(result.context_truncated);
    assert_eq!(
        result.warning,
        "context truncated to fit token budget (kept approx 6 tokens)"
    );

    let requests = rec.requests.lock().unwrap();
    let sent = &requests[0];
    assert_eq!(sent.model_id, "a");
    assert_eq!(sent.model_path, ws.dir.path().join("a.gguf"));
    assert_eq!(sent.max_tokens, 58);
    assert_eq!(
        sent.messages,
        vec![
            Message::system("stay terse"),
            Message::assistant("six seven"),
            Message::user("eight nine"),
        ]
    );
}

#[test]
fn profile_changes_reach_the_request() {
    let ws = Workspace::new("rec");
    let rec = Recorder::default();
    let mut o = ws.orchestrator(vec![Box::new(ScriptedRuntime::new("rec", true, &rec))]);
    o.set_profile("quality").unwrap();
    o.respond(&[Message::user("hi")], &mut |_| {}).unwrap();
    assert_eq!(rec.requests.lock().unwrap()[0].max_tokens, 512);
    assert_eq!(o.prompt_token_budget(), 3584);
}

// ── Models and state ───────────────────────────────────────────────

#[test]
fn duplicate_add_leaves_catalog_untouched() {
    let ws = Workspace::new("mock");
    let mut o = ws.orchestrator(vec![Box::new(MockRuntime)]);
    let before = std::fs::read_to_string(&ws.config.models_file).unwrap();

    let err = o
        .add_model(ModelDescriptor::new("a", "repo/other", "x.gguf", "./x.gguf"))
        .unwrap_err();
    assert!(matches!(err, SentraError::DuplicateModel(ref id) if id == "a"));
    assert_eq!(std::fs::read_to_string(&ws.config.models_file).unwrap(), before);
    assert_eq!(o.models().len(), 2);
}

#[test]
fn added_model_survives_reload() {
    let ws = Workspace::new("mock");
    let mut o = ws.orchestrator(vec![Box::new(MockRuntime)]);
    o.add_model(
        ModelDescriptor::new("c", "repo/c", "c.gguf", "./models/c.gguf").with_name("Model C"),
    )
    .unwrap();

    let reloaded = ModelDirectory::load_from_tsv(&ws.config.models_file, None).unwrap();
    let c = reloaded.find("c").unwrap();
    assert_eq!(c.name, "Model C");
    assert_eq!(c.local_path, PathBuf::from("./models/c.gguf"));
}

#[test]
fn persisted_model_wins_over_default() {
    let ws = Workspace::new("mock");
    let config = AppConfig {
        default_model_id: "a".into(),
        ..ws.config.clone()
    };
    AppState::new(&config.state_file).save_active_model_id("b");

    let o = Orchestrator::from_config(config).unwrap();
    assert_eq!(o.active_model().unwrap().id, "b");
    assert_eq!(o.models_file_path(), ws.config.models_file.as_path());
}

#[test]
fn from_config_without_catalog_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig::default().with_data_root(dir.path());
    let err = Orchestrator::from_config(config).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

// ── Native runtime through the orchestrator ────────────────────────

const BOS: TokenId = 1;

/// Engine that replies with a fixed word and counts evaluated tokens.
struct CountingEngine {
    fed: Arc<AtomicUsize>,
    reply: Vec<TokenId>,
    cursor: usize,
}

impl InferenceEngine for CountingEngine {
    fn tokenize(&mut self, text: &str) -> Result<Vec<TokenId>> {
        Ok(std::iter::once(BOS)
            .chain(text.chars().map(|c| c as TokenId))
            .collect())
    }
    fn clear_cache(&mut self) {}
    fn feed(&mut self, tokens: &[TokenId]) -> Result<()> {
        self.fed.fetch_add(tokens.len(), Ordering::SeqCst);
        Ok(())
    }
    fn begin_sampling(&mut self, _params: &SamplingParams) {
        self.cursor = 0;
    }
    fn sample(&mut self) -> Result<TokenId> {
        let token = self.reply.get(self.cursor).copied().unwrap_or(0);
        self.cursor += 1;
        Ok(token)
    }
    fn accept(&mut self, _token: TokenId) {}
    fn is_end_of_generation(&self, token: TokenId) -> bool {
        token == 0
    }
    fn detokenize(&mut self, token: TokenId) -> Result<String> {
        Ok(char::from_u32(token as u32).map(String::from).unwrap_or_default())
    }
}

#[derive(Clone, Default)]
struct CountingLoader {
    fed: Arc<AtomicUsize>,
}

impl EngineLoader for CountingLoader {
    fn check(&self) -> std::result::Result<(), String> {
        Ok(())
    }
    fn load(&self, _model_path: &Path) -> Result<Box<dyn InferenceEngine>> {
        Ok(Box::new(CountingEngine {
            fed: Arc::clone(&self.fed),
            reply: "hey".chars().map(|c| c as TokenId).collect(),
            cursor: 0,
        }))
    }
}

#[test]
fn native_second_turn_only_feeds_new_tokens() {
    let ws = Workspace::new("llama-inproc");
    let loader = CountingLoader::default();
    let native = NativeRuntime::with_loader(Box::new(loader.clone()), Profile::Fast.sampling());
    let mut o = ws.orchestrator(vec![Box::new(native), Box::new(MockRuntime)]);
    assert_eq!(o.active_runtime_name(), "llama-inproc");

    let mut history = vec![Message::system("sys"), Message::user("hello")];
    let first = o.respond(&history, &mut |_| {}).unwrap();
    assert_eq!(first.text, "hey");
    let fed_first = loader.fed.load(Ordering::SeqCst);

    history.push(Message::assistant(first.text));
    history.push(Message::user("again"));
    let second = o.respond(&history, &mut |_| {}).unwrap();
    assert_eq!(second.text, "hey");
    let fed_second = loader.fed.load(Ordering::SeqCst) - fed_first;

    let full_prompt = 1 + sentra::runtime::render_prompt(&history).chars().count();
    assert!(fed_second < full_prompt, "fed {fed_second} of {full_prompt}");
}
