//! The generation call surface consumed by the REPL.
//!
//! An [`Orchestrator`] owns the configuration, the model directory, the
//! durable app state and the runtime list. It selects a runtime once at
//! construction (see [`RuntimeSelection`]) and then serves
//! [`respond`](Orchestrator::respond) calls:
//!
//! ```text
//! history ──► prune to prompt budget ──► GenerationRequest ──► runtime.generate
//!                                                                    │
//!                       GenerationResult (+ truncation warning) ◄────┘
//! ```

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::context::{prompt_token_budget, prune_context_window};
use crate::models::{ModelDescriptor, ModelDirectory, append_to_catalog};
use crate::profile::{Profile, TokenSettings};
use crate::runtime::{Runtime, RuntimeSelection, default_runtimes};
use crate::state::AppState;
use crate::{GenerationRequest, GenerationResult, Message, Result, SentraError};

/// Floor for [`Orchestrator::set_max_tokens`].
pub const MIN_MAX_TOKENS: usize = 1;
/// Floor for [`Orchestrator::set_context_window_tokens`].
pub const MIN_CONTEXT_WINDOW_TOKENS: usize = 64;
/// Shown in place of a preset name after manual token changes.
pub const CUSTOM_PROFILE_LABEL: &str = "custom";

pub struct Orchestrator {
    config: AppConfig,
    models: ModelDirectory,
    state: AppState,
    runtimes: Vec<Box<dyn Runtime>>,
    selection: RuntimeSelection,
    /// `None` once the token settings were changed by hand.
    profile: Option<Profile>,
}

impl Orchestrator {
    /// Assemble an orchestrator from parts and run runtime selection.
    pub fn new(
        config: AppConfig,
        models: ModelDirectory,
        state: AppState,
        runtimes: Vec<Box<dyn Runtime>>,
    ) -> Self {
        let selection = RuntimeSelection::pick(&runtimes, &config.runtime_preference);
        let starting = config.starting_profile();
        let current = TokenSettings {
            max_tokens: config.max_tokens,
            context_window_tokens: config.context_window_tokens,
        };
        let profile = (starting.token_settings() == current).then_some(starting);
        Self {
            config,
            models,
            state,
            runtimes,
            selection,
            profile,
        }
    }

    /// Build everything from `config`: load the catalog (the persisted
    /// active model wins over `default_model_id`) and the built-in runtimes.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let state = AppState::new(&config.state_file);
        let preferred = state
            .load_active_model_id()
            .unwrap_or_else(|| config.default_model_id.clone());
        let models =
            ModelDirectory::load_from_tsv(&config.models_file, Some(preferred.as_str()))?;
        let runtimes = default_runtimes(&config);
        Ok(Self::new(config, models, state, runtimes))
    }

    // ── Runtime ────────────────────────────────────────────────────

    fn active_runtime(&self) -> Option<&dyn Runtime> {
        self.selection
            .index
            .and_then(|i| self.runtimes.get(i))
            .map(|r| r.as_ref())
    }

    /// Name of the selected runtime, or `none`.
    pub fn active_runtime_name(&self) -> &str {
        self.active_runtime().map_or("none", |r| r.name())
    }

    /// Why the preferred runtime was not used. Empty when it was.
    pub fn runtime_selection_note(&self) -> &str {
        &self.selection.note
    }

    // ── Models ─────────────────────────────────────────────────────

    pub fn models(&self) -> &[ModelDescriptor] {
        self.models.models()
    }

    pub fn active_model(&self) -> Option<&ModelDescriptor> {
        self.models.active_model()
    }

    pub fn find_model(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.find(id)
    }

    pub fn models_file_path(&self) -> &Path {
        &self.config.models_file
    }

    /// Switch the active model and persist the choice. On failure nothing
    /// changes.
    pub fn set_active_model(&mut self, id: &str) -> Result<()> {
        self.models.set_active(id)?;
        self.state.save_active_model_id(id);
        info!("active model: {id}");
        Ok(())
    }

    /// Register a model: validate, append to the catalog file, then add in
    /// memory. If the catalog write fails the directory is unchanged.
    pub fn add_model(&mut self, mut model: ModelDescriptor) -> Result<()> {
        if !model.is_complete() {
            return Err(SentraError::IncompleteModel);
        }
        if self.models.find(&model.id).is_some() {
            return Err(SentraError::DuplicateModel(model.id));
        }
        if model.name.is_empty() {
            model.name = model.id.clone();
        }
        model.check_catalog_fields()?;
        append_to_catalog(&self.config.models_file, &model)?;
        info!("added model {} -> {}", model.id, model.local_path.display());
        self.models.add(model)
    }

    /// Check the active model's metadata and file. `Ok` carries a success
    /// report, `Err` the reason validation failed.
    pub fn validate_active_model(&self) -> std::result::Result<String, String> {
        let Some(model) = self.models.active_model() else {
            return Err("no active model configured".to_string());
        };
        if !model.is_complete() {
            return Err(format!(
                "active model metadata is incomplete for id: {}",
                model.id
            ));
        }
        let path = &model.local_path;
        if !path.exists() {
            return Err(format!("model file not found at {}", path.display()));
        }
        if !path.is_file() {
            return Err(format!("model path is not a regular file: {}", path.display()));
        }
        if std::fs::File::open(path).is_err() {
            return Err(format!(
                "model file exists but is not readable: {}",
                path.display()
            ));
        }
        Ok(format!("model valid: {} @ {}", model.id, path.display()))
    }

    // ── Token budget and profiles ──────────────────────────────────

    pub fn max_tokens(&self) -> usize {
        self.config.max_tokens
    }

    pub fn context_window_tokens(&self) -> usize {
        self.config.context_window_tokens
    }

    /// Tokens available for the prompt after reserving the reply.
    pub fn prompt_token_budget(&self) -> usize {
        prompt_token_budget(self.config.context_window_tokens, self.config.max_tokens)
    }

    pub fn token_settings(&self) -> TokenSettings {
        TokenSettings {
            max_tokens: self.config.max_tokens,
            context_window_tokens: self.config.context_window_tokens,
        }
    }

    /// Set the reply length. Values below 1 are raised to 1.
    pub fn set_max_tokens(&mut self, value: usize) {
        self.config.max_tokens = value.max(MIN_MAX_TOKENS);
        self.drop_stale_profile();
    }

    /// Set the context window. Values below 64 are raised to 64.
    pub fn set_context_window_tokens(&mut self, value: usize) {
        self.config.context_window_tokens = value.max(MIN_CONTEXT_WINDOW_TOKENS);
        self.drop_stale_profile();
    }

    /// Forget the preset once the token settings no longer match it.
    fn drop_stale_profile(&mut self) {
        let current = self.token_settings();
        self.profile = self.profile.filter(|p| p.token_settings() == current);
    }

    /// The preset in effect, or `None` after manual token changes.
    pub fn profile(&self) -> Option<Profile> {
        self.profile
    }

    /// Preset name, or `custom`.
    pub fn profile_label(&self) -> &'static str {
        self.profile.map_or(CUSTOM_PROFILE_LABEL, Profile::as_str)
    }

    /// Apply a named profile (case-insensitive). Unknown names change nothing.
    pub fn set_profile(&mut self, name: &str) -> Result<()> {
        let profile: Profile = name.parse()?;
        let settings = profile.token_settings();
        self.profile = Some(profile);
        self.config.max_tokens = settings.max_tokens;
        self.config.context_window_tokens = settings.context_window_tokens;
        info!(
            "profile {profile}: max_tokens={}, context_window={}",
            settings.max_tokens, settings.context_window_tokens
        );
        Ok(())
    }

    // ── Generation ─────────────────────────────────────────────────

    /// Generate a reply to `history`, streaming fragments to `on_token`.
    ///
    /// Preconditions are checked in order before any runtime is invoked: a
    /// runtime was selected, a model is active, and its file exists and can
    /// be opened.
    pub fn respond(
        &mut self,
        history: &[Message],
        on_token: &mut dyn FnMut(&str),
    ) -> Result<GenerationResult> {
        let runtime = self
            .active_runtime()
            .ok_or_else(|| SentraError::NoRuntimeAvailable(self.selection.note.clone()))?;
        let model = self.models.active_model().ok_or(SentraError::NoActiveModel)?;
        check_model_file(&model.local_path)?;

        let budget = self.prompt_token_budget();
        let pruned = prune_context_window(history, budget);
        let request = GenerationRequest {
            messages: pruned.messages,
            model_id: model.id.clone(),
            model_path: model.local_path.clone(),
            max_tokens: self.config.max_tokens,
        };
        debug!(
            runtime = runtime.name(),
            model = %request.model_id,
            budget,
            messages = request.messages.len(),
            "respond"
        );

        let mut result = runtime.generate(&request, on_token)?;
        if pruned.truncated {
            result.context_truncated = true;
            result.warning = format!(
                "context truncated to fit token budget (kept approx {} tokens)",
                pruned.tokens_kept
            );
            warn!("{}", result.warning);
        }
        debug!("{}", result.to_log_string());
        Ok(result)
    }
}

fn check_model_file(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(SentraError::ModelFileMissing {
            path: PathBuf::from(path),
        });
    }
    std::fs::File::open(path).map_err(|_| SentraError::ModelFileUnreadable {
        path: PathBuf::from(path),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;

    struct Fixture {
        _dir: tempfile::TempDir,
        orchestrator: Orchestrator,
        model_file: PathBuf,
    }

    fn fixture(runtimes: Vec<Box<dyn Runtime>>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::default()
            .with_data_root(dir.path())
            .with_runtime_preference("mock");
        let model_file = dir.path().join("m.gguf");
        std::fs::write(&model_file, b"gguf").unwrap();
        std::fs::write(
            &config.models_file,
            format!("m\tModel\trepo/m\tm.gguf\t{}\n", model_file.display()),
        )
        .unwrap();
        let models = ModelDirectory::load_from_tsv(&config.models_file, None).unwrap();
        let state = AppState::new(&config.state_file);
        Fixture {
            orchestrator: Orchestrator::new(config, models, state, runtimes),
            model_file,
            _dir: dir,
        }
    }

    #[test]
    fn respond_with_mock_streams_reply() {
        let mut fx = fixture(vec![Box::new(MockRuntime)]);
        let mut streamed = String::new();
        let result = fx
            .orchestrator
            .respond(&[Message::user("ping")], &mut |p| streamed.push_str(p))
            .unwrap();
        assert!(result.text.contains("ping"));
        assert_eq!(streamed, result.text);
        assert!(!result.context_truncated);
        assert!(result.warning.is_empty());
    }

    #[test]
    fn no_runtime_is_configuration_error() {
        let mut fx = fixture(vec![]);
        assert_eq!(fx.orchestrator.active_runtime_name(), "none");
        assert_eq!(fx.orchestrator.runtime_selection_note(), "no runtimes configured");
        let err = fx
            .orchestrator
            .respond(&[Message::user("hi")], &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, SentraError::NoRuntimeAvailable(_)));
    }

    #[test]
    fn missing_model_file_fails_before_runtime() {
        let mut fx = fixture(vec![Box::new(MockRuntime)]);
        std::fs::remove_file(&fx.model_file).unwrap();
        let mut called = false;
        let err = fx
            .orchestrator
            .respond(&[Message::user("hi")], &mut |_| called = true)
            .unwrap_err();
        assert!(matches!(err, SentraError::ModelFileMissing { .. }));
        assert!(!called);
    }

    #[test]
    fn directory_at_model_path_is_not_a_model_file() {
        let mut fx = fixture(vec![Box::new(MockRuntime)]);
        std::fs::remove_file(&fx.model_file).unwrap();
        std::fs::create_dir(&fx.model_file).unwrap();
        assert!(!fx.orchestrator.active_model().unwrap().is_ready());

        let mut called = false;
        let err = fx
            .orchestrator
            .respond(&[Message::user("hi")], &mut |_| called = true)
            .unwrap_err();
        assert!(matches!(err, SentraError::ModelFileMissing { .. }));
        assert!(!called);

        let reason = fx.orchestrator.validate_active_model().unwrap_err();
        assert!(reason.starts_with("model path is not a regular file"));
    }

    #[test]
    fn truncation_sets_warning() {
        let mut fx = fixture(vec![Box::new(MockRuntime)]);
        fx.orchestrator.set_context_window_tokens(64);
        fx.orchestrator.set_max_tokens(60);
        assert_eq!(fx.orchestrator.prompt_token_budget(), 4);

        let history = vec![
            Message::user("an old message that is far too long to fit"),
            Message::user("newest ask"),
        ];
        let result = fx.orchestrator.respond(&history, &mut |_| {}).unwrap();
        assert!(result.context_truncated);
        assert_eq!(
            result.warning,
            "context truncated to fit token budget (kept approx 2 tokens)"
        );
    }

    #[test]
    fn setters_clamp() {
        let mut fx = fixture(vec![Box::new(MockRuntime)]);
        fx.orchestrator.set_max_tokens(0);
        fx.orchestrator.set_context_window_tokens(10);
        assert_eq!(fx.orchestrator.max_tokens(), 1);
        assert_eq!(fx.orchestrator.context_window_tokens(), 64);
    }

    #[test]
    fn profiles_swap_token_settings() {
        let mut fx = fixture(vec![Box::new(MockRuntime)]);
        let o = &mut fx.orchestrator;
        o.set_profile("FAST").unwrap();
        assert_eq!((o.max_tokens(), o.context_window_tokens()), (128, 1024));
        assert_eq!(o.profile(), Some(Profile::Fast));

        let err = o.set_profile("bogus").unwrap_err();
        assert_eq!(err.to_string(), "unknown profile: bogus (use fast|balanced|quality)");
        assert_eq!((o.max_tokens(), o.context_window_tokens()), (128, 1024));
        assert_eq!(o.profile(), Some(Profile::Fast));
    }

    #[test]
    fn manual_token_changes_mark_profile_custom() {
        let mut fx = fixture(vec![Box::new(MockRuntime)]);
        let o = &mut fx.orchestrator;
        assert_eq!(o.profile(), Some(Profile::Balanced));
        o.set_max_tokens(256);
        assert_eq!(o.profile_label(), "balanced");

        o.set_max_tokens(300);
        assert_eq!(o.profile(), None);
        assert_eq!(o.profile_label(), "custom");

        o.set_profile("quality").unwrap();
        o.set_context_window_tokens(10);
        assert_eq!(o.profile_label(), "custom");
    }

    #[test]
    fn set_active_model_persists() {
        let mut fx = fixture(vec![Box::new(MockRuntime)]);
        fx.orchestrator
            .add_model(ModelDescriptor::new("q", "repo/q", "q.gguf", "./q.gguf"))
            .unwrap();
        fx.orchestrator.set_active_model("q").unwrap();
        assert_eq!(fx.orchestrator.active_model().unwrap().id, "q");
        assert_eq!(
            fx.orchestrator.state.load_active_model_id().as_deref(),
            Some("q")
        );

        let err = fx.orchestrator.set_active_model("zzz").unwrap_err();
        assert_eq!(err.to_string(), "unknown model id: zzz");
        assert_eq!(fx.orchestrator.active_model().unwrap().id, "q");
    }

    #[test]
    fn add_model_defaults_name_and_rejects_incomplete() {
        let mut fx = fixture(vec![Box::new(MockRuntime)]);
        let err = fx
            .orchestrator
            .add_model(ModelDescriptor::new("x", "", "f", "p"))
            .unwrap_err();
        assert!(matches!(err, SentraError::IncompleteModel));

        fx.orchestrator
            .add_model(ModelDescriptor::new("x", "r", "f", "p"))
            .unwrap();
        assert_eq!(fx.orchestrator.find_model("x").unwrap().name, "x");
    }

    #[test]
    fn add_model_rejects_fields_that_break_the_catalog() {
        let mut fx = fixture(vec![Box::new(MockRuntime)]);
        let catalog = fx.orchestrator.models_file_path().to_path_buf();
        let before = std::fs::read_to_string(&catalog).unwrap();

        for model in [
            ModelDescriptor::new("c", "repo\tevil", "c.gguf", "./c.gguf"),
            ModelDescriptor::new("x\ny", "r", "f", "p"),
        ] {
            let err = fx.orchestrator.add_model(model).unwrap_err();
            assert!(matches!(err, SentraError::InvalidModelField(_)));
            assert_eq!(err.kind(), crate::ErrorKind::ModelState);
        }
        assert_eq!(std::fs::read_to_string(&catalog).unwrap(), before);
        assert_eq!(fx.orchestrator.models().len(), 1);
    }

    #[test]
    fn validate_reports() {
        let fx = fixture(vec![Box::new(MockRuntime)]);
        let report = fx.orchestrator.validate_active_model().unwrap();
        assert!(report.starts_with("model valid: m @ "));

        std::fs::remove_file(&fx.model_file).unwrap();
        let err = fx.orchestrator.validate_active_model().unwrap_err();
        assert!(err.starts_with("model file not found at"));
    }
}
