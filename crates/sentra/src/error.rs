//! Error types for sentra.
//!
//! Every fallible operation in the crate returns [`Result`]. Variants are
//! grouped into coarse categories through [`SentraError::kind`] so the REPL
//! and tests can branch on the category without matching every variant.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using sentra's error type.
pub type Result<T> = std::result::Result<T, SentraError>;

/// Errors surfaced by the orchestrator, runtimes and on-disk collaborators.
#[derive(Error, Debug)]
pub enum SentraError {
    /// Runtime selection produced nothing; carries the selection note.
    #[error("no available runtime ({0})")]
    NoRuntimeAvailable(String),

    /// Malformed or missing configuration input.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no active model configured")]
    NoActiveModel,

    #[error("unknown model id: {0}")]
    UnknownModel(String),

    #[error("model id already exists: {0}")]
    DuplicateModel(String),

    #[error("model requires non-empty id, hf_repo, hf_file, and local_path")]
    IncompleteModel,

    /// A field would not survive a round trip through the catalog file.
    #[error("model {0} must not contain tabs, line breaks or surrounding whitespace")]
    InvalidModelField(&'static str),

    /// The active model's local file does not exist.
    #[error("active model path is missing: {} (run /model validate)", path.display())]
    ModelFileMissing { path: PathBuf },

    /// The active model's local file exists but cannot be opened.
    #[error("active model path is not readable: {}", path.display())]
    ModelFileUnreadable { path: PathBuf },

    /// A backend was asked to generate while unable to.
    #[error("{runtime} runtime unavailable: {reason}")]
    RuntimeUnavailable { runtime: String, reason: String },

    /// A backend failed mid-call. Carries the backend's diagnostic text.
    #[error("{runtime} generation failed: {message}")]
    Generation { runtime: String, message: String },

    /// A session id that would escape the sessions directory.
    #[error("invalid session id: {0:?} (no path separators, '..' or leading '.')")]
    InvalidSessionId(String),

    #[error("unknown profile: {0} (use fast|balanced|quality)")]
    UnknownProfile(String),

    /// Filesystem error from a collaborator (catalog, session log, state).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    ModelState,
    ModelFile,
    RuntimeUnavailable,
    Generation,
    Io,
}

impl SentraError {
    /// Create a runtime-unavailable error.
    pub fn runtime_unavailable(runtime: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RuntimeUnavailable {
            runtime: runtime.into(),
            reason: reason.into(),
        }
    }

    /// Create a generation failure.
    pub fn generation(runtime: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Generation {
            runtime: runtime.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoRuntimeAvailable(_)
            | Self::Config(_)
            | Self::UnknownProfile(_)
            | Self::InvalidSessionId(_) => ErrorKind::Configuration,
            Self::NoActiveModel
            | Self::UnknownModel(_)
            | Self::DuplicateModel(_)
            | Self::IncompleteModel
            | Self::InvalidModelField(_) => ErrorKind::ModelState,
            Self::ModelFileMissing { .. } | Self::ModelFileUnreadable { .. } => {
                ErrorKind::ModelFile
            }
            Self::RuntimeUnavailable { .. } => ErrorKind::RuntimeUnavailable,
            Self::Generation { .. } => ErrorKind::Generation,
            Self::Io(_) | Self::Serialization(_) => ErrorKind::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_operator_facing_text() {
        assert_eq!(
            SentraError::UnknownModel("x".into()).to_string(),
            "unknown model id: x"
        );
        assert_eq!(
            SentraError::DuplicateModel("x".into()).to_string(),
            "model id already exists: x"
        );
        assert_eq!(
            SentraError::UnknownProfile("turbo".into()).to_string(),
            "unknown profile: turbo (use fast|balanced|quality)"
        );
        assert_eq!(
            SentraError::ModelFileUnreadable {
                path: PathBuf::from("/m.gguf")
            }
            .to_string(),
            "active model path is not readable: /m.gguf"
        );
    }

    #[test]
    fn kinds_group_variants() {
        assert_eq!(SentraError::NoActiveModel.kind(), ErrorKind::ModelState);
        assert_eq!(
            SentraError::NoRuntimeAvailable("no runtimes configured".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            SentraError::ModelFileMissing {
                path: PathBuf::from("a")
            }
            .kind(),
            ErrorKind::ModelFile
        );
        assert_eq!(
            SentraError::generation("mock", "boom").kind(),
            ErrorKind::Generation
        );
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(SentraError::from(io).kind(), ErrorKind::Io);
    }
}
