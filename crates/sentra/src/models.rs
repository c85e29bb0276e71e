//! Model catalog and active-model directory.
//!
//! The catalog is a tab-separated file with one model per row:
//!
//! ```text
//! # id          name          hf_repo               hf_file            local_path
//! llama31_8b  Llama 3.1 8B  bartowski/Llama-3.1…  Llama-3.1-8B.gguf  ./models/llama31.gguf
//! ```
//!
//! `#` comments and blank lines are ignored, as are rows with fewer than five
//! columns. Cells are trimmed.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::{Result, SentraError};

/// One catalog entry. Looked up, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub id: String,
    /// Display name. Defaults to `id` when added without one.
    pub name: String,
    /// Source repository reference (e.g. a Hugging Face repo).
    pub hf_repo: String,
    /// File within the source repository.
    pub hf_file: String,
    pub local_path: PathBuf,
}

impl ModelDescriptor {
    pub fn new(
        id: impl Into<String>,
        hf_repo: impl Into<String>,
        hf_file: impl Into<String>,
        local_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            hf_repo: hf_repo.into(),
            hf_file: hf_file.into(),
            local_path: local_path.into(),
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// True when every field a download or load needs is present.
    pub fn is_complete(&self) -> bool {
        !self.id.is_empty()
            && !self.hf_repo.is_empty()
            && !self.hf_file.is_empty()
            && !self.local_path.as_os_str().is_empty()
    }

    /// Check that every field survives a catalog round trip: no tabs or line
    /// breaks, no surrounding whitespace (cells are trimmed on load), and an
    /// id that does not read as a comment.
    pub fn check_catalog_fields(&self) -> Result<()> {
        let path = self.local_path.to_string_lossy();
        let fields = [
            ("id", self.id.as_str()),
            ("name", self.name.as_str()),
            ("hf_repo", self.hf_repo.as_str()),
            ("hf_file", self.hf_file.as_str()),
            ("local_path", path.as_ref()),
        ];
        for (field, value) in fields {
            if value.contains(['\t', '\n', '\r']) || value.trim() != value {
                return Err(SentraError::InvalidModelField(field));
            }
        }
        if self.id.starts_with('#') {
            return Err(SentraError::InvalidModelField("id"));
        }
        Ok(())
    }

    /// True when the local model file exists.
    pub fn is_ready(&self) -> bool {
        self.local_path.is_file()
    }

    fn to_tsv_row(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\n",
            self.id,
            self.name,
            self.hf_repo,
            self.hf_file,
            self.local_path.display()
        )
    }
}

/// Parse catalog text into descriptors, skipping comments, blank lines,
/// short rows and rows with an empty id.
pub fn parse_catalog(text: &str) -> Vec<ModelDescriptor> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('\t').map(str::trim).collect();
            if cols.len() < 5 || cols[0].is_empty() {
                return None;
            }
            Some(ModelDescriptor {
                id: cols[0].to_string(),
                name: cols[1].to_string(),
                hf_repo: cols[2].to_string(),
                hf_file: cols[3].to_string(),
                local_path: PathBuf::from(cols[4]),
            })
        })
        .collect()
}

/// Append one row for `model` to the catalog at `path`, creating the file if
/// needed.
pub fn append_to_catalog(path: &Path, model: &ModelDescriptor) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?;

    // Keep the new row on its own line when the file lacks a trailing newline.
    let len = file.metadata()?.len();
    if len > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(len - 1))?;
        file.read_exact(&mut last)?;
        if last[0] != b'\n' {
            file.write_all(b"\n")?;
        }
    }
    file.write_all(model.to_tsv_row().as_bytes())?;
    file.flush()?;
    debug!("appended model {} to {}", model.id, path.display());
    Ok(())
}

// ── ModelDirectory ─────────────────────────────────────────────────

/// In-memory view of the catalog plus the active selection.
#[derive(Debug, Clone, Default)]
pub struct ModelDirectory {
    models: Vec<ModelDescriptor>,
    active: Option<usize>,
}

impl ModelDirectory {
    /// Build a directory from descriptors. The active model is `preferred_id`
    /// if present, else the first entry.
    pub fn new(models: Vec<ModelDescriptor>, preferred_id: Option<&str>) -> Self {
        let active = preferred_id
            .and_then(|id| models.iter().position(|m| m.id == id))
            .or(if models.is_empty() { None } else { Some(0) });
        Self { models, active }
    }

    /// Load the catalog at `path`. Fails if the file cannot be read or yields
    /// no rows.
    pub fn load_from_tsv(path: impl AsRef<Path>, preferred_id: Option<&str>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SentraError::config(format!(
                "failed to open models registry {}: {e}",
                path.display()
            ))
        })?;
        let models = parse_catalog(&text);
        if models.is_empty() {
            return Err(SentraError::config(format!(
                "models registry is empty: {}",
                path.display()
            )));
        }
        info!("loaded {} model(s) from {}", models.len(), path.display());
        Ok(Self::new(models, preferred_id))
    }

    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn active_model(&self) -> Option<&ModelDescriptor> {
        self.active.and_then(|i| self.models.get(i))
    }

    pub fn find(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == id)
    }

    /// Select `id` as the active model. Unknown ids leave the selection as is.
    pub fn set_active(&mut self, id: &str) -> Result<()> {
        let index = self
            .models
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| SentraError::UnknownModel(id.to_string()))?;
        self.active = Some(index);
        Ok(())
    }

    /// Register a new model. Fails on a duplicate id.
    pub fn add(&mut self, model: ModelDescriptor) -> Result<()> {
        if self.find(&model.id).is_some() {
            return Err(SentraError::DuplicateModel(model.id));
        }
        self.models.push(model);
        if self.active.is_none() {
            self.active = Some(0);
        }
        Ok(())
    }
}
