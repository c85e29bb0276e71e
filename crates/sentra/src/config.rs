//! Application configuration with sensible defaults.
//!
//! [`AppConfig`] is read from a JSON file. Every field is optional in the
//! file; missing fields take the defaults below, and a missing file yields
//! [`AppConfig::default`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::profile::Profile;
use crate::runtime::NATIVE_RUNTIME_NAME;
use crate::{Result, SentraError};

/// Configuration for a sentra session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Name of the backend to try first. Default: `"llama-inproc"`.
    pub runtime_preference: String,
    /// Directory holding session logs. Default: `".sentra/sessions"`.
    pub sessions_dir: PathBuf,
    /// Durable active-model state. Default: `".sentra/state.json"`.
    pub state_file: PathBuf,
    /// Tab-separated model catalog. Default: `"models.tsv"`.
    pub models_file: PathBuf,
    /// Active model when no persisted choice exists. Default: `"llama31_8b_q4km"`.
    pub default_model_id: String,
    /// First message of every new session.
    pub system_prompt: String,
    /// Command for the external-process backend. Must contain `{prompt}`,
    /// `{model_path}` and `{max_tokens}`. Default: empty (backend unavailable).
    pub local_command_template: String,
    /// Reply length limit in tokens. Default: `256`.
    pub max_tokens: usize,
    /// Model context window in tokens. Default: `2048`.
    pub context_window_tokens: usize,
    /// Starting profile; selects native sampling. Default: `"balanced"`.
    pub profile: String,
    pub native: NativeOptions,
}

/// Tuning knobs for the in-process backend. Zero means "engine default".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeOptions {
    pub n_threads: i32,
    pub n_threads_batch: i32,
    pub n_batch: u32,
    /// Context size handed to the engine. `0` uses the model's training size.
    pub n_ctx: u32,
    pub offload_kqv: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            runtime_preference: NATIVE_RUNTIME_NAME.to_string(),
            sessions_dir: PathBuf::from(".sentra/sessions"),
            state_file: PathBuf::from(".sentra/state.json"),
            models_file: PathBuf::from("models.tsv"),
            default_model_id: "llama31_8b_q4km".to_string(),
            system_prompt: "You are Sentra, a local-first terminal AI assistant.".to_string(),
            local_command_template: String::new(),
            max_tokens: 256,
            context_window_tokens: 2048,
            profile: Profile::default().as_str().to_string(),
            native: NativeOptions::default(),
        }
    }
}

impl Default for NativeOptions {
    fn default() -> Self {
        Self {
            n_threads: 0,
            n_threads_batch: 0,
            n_batch: 512,
            n_ctx: 0,
            offload_kqv: false,
        }
    }
}

impl AppConfig {
    /// Load from `path`. A missing file yields defaults; a malformed one is
    /// a configuration error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("config {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| SentraError::config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Parsed starting profile. Unknown names fall back to balanced.
    pub fn starting_profile(&self) -> Profile {
        self.profile.parse().unwrap_or_else(|e| {
            warn!("{e}; falling back to balanced");
            Profile::Balanced
        })
    }

    /// Set the reply length in tokens.
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the context window in tokens.
    pub fn with_context_window_tokens(mut self, tokens: usize) -> Self {
        self.context_window_tokens = tokens;
        self
    }

    /// Set the preferred backend name.
    pub fn with_runtime_preference(mut self, name: impl Into<String>) -> Self {
        self.runtime_preference = name.into();
        self
    }

    /// Set the external-process command template.
    pub fn with_local_command_template(mut self, template: impl Into<String>) -> Self {
        self.local_command_template = template.into();
        self
    }

    /// Point every on-disk location under `root`. Handy for tests and
    /// throwaway sessions.
    pub fn with_data_root(mut self, root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        self.sessions_dir = root.join("sessions");
        self.state_file = root.join("state.json");
        self.models_file = root.join("models.tsv");
        self
    }
}
