//! Durable app state: remembers the active model across restarts.
//!
//! Stored as a small JSON object. Reads and writes are best-effort: a
//! missing or corrupt file reads as "nothing saved", and write failures are
//! logged, never raised.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Serialize, Deserialize, Debug, Default)]
struct StateFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    active_model_id: Option<String>,
    /// Keys written by other versions, carried through untouched.
    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

/// Handle to the state file.
#[derive(Debug, Clone)]
pub struct AppState {
    path: PathBuf,
}

impl AppState {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Option<StateFile> {
        let json = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&json) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("ignoring malformed state file {}: {e}", self.path.display());
                None
            }
        }
    }

    /// Persisted active model id, if any.
    pub fn load_active_model_id(&self) -> Option<String> {
        self.read()?
            .active_model_id
            .filter(|id| !id.trim().is_empty())
    }

    /// Persist `model_id` as the active model. Best-effort.
    pub fn save_active_model_id(&self, model_id: &str) {
        let mut state = self.read().unwrap_or_default();
        state.active_model_id = Some(model_id.to_string());
        match self.write(&state) {
            Ok(()) => debug!("saved active model {model_id} to {}", self.path.display()),
            Err(e) => warn!("failed to save app state: {e}"),
        }
    }

    /// Atomic write: serialize to a temp file, then rename into place.
    fn write(&self, state: &StateFile) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)
    }
}
