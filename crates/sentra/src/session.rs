//! Append-only session logs with metadata.
//!
//! Each session is two files under the sessions directory: a JSON-lines log
//! of [`Message`]s and a small metadata record rewritten after every turn.
//!
//! ```text
//! sessions_dir/
//!   session-1718000000.jsonl
//!   session-1718000000.meta.json
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Message, Result, SentraError};

// ── SessionMetadata ────────────────────────────────────────────────

/// Per-session record, stored as `<id>.meta.json`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionMetadata {
    pub session_id: String,
    /// Unix epoch seconds when the session was created.
    pub created_at: u64,
    /// Unix epoch seconds of the last update.
    #[serde(default)]
    pub updated_at: u64,
    pub active_model_id: String,
    pub runtime_name: String,
}

// ── SessionStore ───────────────────────────────────────────────────

/// Manager for session logs and their metadata.
#[derive(Debug, Clone)]
pub struct SessionStore {
    sessions_dir: PathBuf,
}

impl SessionStore {
    /// Create a new store, ensuring the sessions directory exists.
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Result<Self> {
        let sessions_dir = sessions_dir.into();
        std::fs::create_dir_all(&sessions_dir)?;
        Ok(Self { sessions_dir })
    }

    /// Get the sessions root directory.
    pub fn dir(&self) -> &Path {
        &self.sessions_dir
    }

    fn log_path(&self, session_id: &str) -> Result<PathBuf> {
        check_session_id(session_id)?;
        Ok(self.sessions_dir.join(format!("{session_id}.jsonl")))
    }

    fn metadata_path(&self, session_id: &str) -> Result<PathBuf> {
        check_session_id(session_id)?;
        Ok(self.sessions_dir.join(format!("{session_id}.meta.json")))
    }

    /// A fresh id derived from the current time.
    pub fn create_session_id(&self) -> String {
        format!("session-{}", epoch_secs())
    }

    // ── Log operations ─────────────────────────────────────────────

    /// All messages logged for `session_id`, oldest first. A missing log is
    /// an empty history; unparseable lines are skipped.
    pub fn load(&self, session_id: &str) -> Result<Vec<Message>> {
        let path = self.log_path(session_id)?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&path)?;
        let mut messages = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(line) {
                Ok(msg) => messages.push(msg),
                Err(e) => warn!(
                    "skipping malformed line {} in {}: {e}",
                    lineno + 1,
                    path.display()
                ),
            }
        }
        Ok(messages)
    }

    /// Append one message to the session log.
    pub fn append(&self, session_id: &str, message: &Message) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(session_id)?)?;
        file.write_all(line.as_bytes())?;
        debug!("session {session_id}: appended {} message", message.role);
        Ok(())
    }

    // ── Metadata operations ────────────────────────────────────────

    /// Write metadata for `session_id` unless it already exists.
    pub fn ensure_session(
        &self,
        session_id: &str,
        active_model_id: &str,
        runtime_name: &str,
    ) -> Result<SessionMetadata> {
        if let Some(existing) = self.load_metadata(session_id)? {
            return Ok(existing);
        }
        let now = epoch_secs();
        let metadata = SessionMetadata {
            session_id: session_id.to_string(),
            created_at: now,
            updated_at: now,
            active_model_id: active_model_id.to_string(),
            runtime_name: runtime_name.to_string(),
        };
        self.save_metadata(&metadata)?;
        Ok(metadata)
    }

    /// Record the model and runtime of the latest turn. Creation time is
    /// preserved.
    pub fn update_metadata(
        &self,
        session_id: &str,
        active_model_id: &str,
        runtime_name: &str,
    ) -> Result<()> {
        let now = epoch_secs();
        let created_at = self
            .load_metadata(session_id)?
            .map_or(now, |existing| existing.created_at);
        self.save_metadata(&SessionMetadata {
            session_id: session_id.to_string(),
            created_at,
            updated_at: now,
            active_model_id: active_model_id.to_string(),
            runtime_name: runtime_name.to_string(),
        })
    }

    /// Atomic write: serialize to a temp file, then rename into place.
    fn save_metadata(&self, metadata: &SessionMetadata) -> Result<()> {
        let final_path = self.metadata_path(&metadata.session_id)?;
        let tmp_path = self
            .sessions_dir
            .join(format!(".{}.meta.json.tmp", metadata.session_id));

        let json = serde_json::to_string_pretty(metadata)?;
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    /// Load a session's metadata. Returns `None` if the session doesn't exist.
    pub fn load_metadata(&self, session_id: &str) -> Result<Option<SessionMetadata>> {
        let path = self.metadata_path(session_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// All sessions with readable metadata, newest first (ties by id).
    pub fn list_sessions(&self) -> Result<Vec<SessionMetadata>> {
        let mut sessions = Vec::new();
        for entry in std::fs::read_dir(&self.sessions_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !name.ends_with(".meta.json") {
                continue;
            }
            match std::fs::read_to_string(entry.path()) {
                Ok(json) => match serde_json::from_str::<SessionMetadata>(&json) {
                    Ok(m) => sessions.push(m),
                    Err(e) => warn!("Skipping malformed metadata at {name}: {e}"),
                },
                Err(e) => warn!("Skipping unreadable metadata at {name}: {e}"),
            }
        }
        sessions.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(sessions)
    }
}

// ── Helper ─────────────────────────────────────────────────────────

/// Session ids name files directly under the sessions directory, so they
/// must not be empty, hidden, or contain path separators or `..`.
pub fn check_session_id(session_id: &str) -> Result<()> {
    if session_id.is_empty()
        || session_id.starts_with('.')
        || session_id.contains(['/', '\\'])
        || session_id.contains("..")
    {
        return Err(SentraError::InvalidSessionId(session_id.to_string()));
    }
    Ok(())
}

/// Current unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: &str, created_at: u64) -> SessionMetadata {
        SessionMetadata {
            session_id: id.into(),
            created_at,
            updated_at: created_at,
            active_model_id: "m".into(),
            runtime_name: "mock".into(),
        }
    }

    #[test]
    fn session_ids_stay_inside_the_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("sessions");
        let store = SessionStore::new(&dir).unwrap();

        for id in ["../x", "a/b", "a\\b", "..", ".hidden", ""] {
            let err = store.append(id, &Message::user("hi")).unwrap_err();
            assert!(matches!(err, SentraError::InvalidSessionId(_)), "{id}");
            assert!(store.load(id).is_err());
            assert!(store.ensure_session(id, "m", "mock").is_err());
        }
        assert!(!root.path().join("x.jsonl").exists());
        assert!(std::fs::read_dir(&dir).unwrap().next().is_none());

        store.append("session-1", &Message::user("hi")).unwrap();
        assert_eq!(store.load("session-1").unwrap().len(), 1);
    }

    #[test]
    fn append_and_load_preserve_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();

        store.append("s1", &Message::system("rules")).unwrap();
        store.append("s1", &Message::user("multi\nline\tcontent")).unwrap();
        store.append("s1", &Message::assistant("ok")).unwrap();

        let history = store.load("s1").unwrap();
        assert_eq!(
            history,
            vec![
                Message::system("rules"),
                Message::user("multi\nline\tcontent"),
                Message::assistant("ok"),
            ]
        );
    }

    #[test]
    fn missing_log_is_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        assert!(store.load("nope").unwrap().is_empty());
        assert!(store.load_metadata("nope").unwrap().is_none());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        store.append("s", &Message::user("a")).unwrap();
        let path = dir.path().join("s.jsonl");
        let mut text = std::fs::read_to_string(&path).unwrap();
        text.push_str("garbage\n\n");
        std::fs::write(&path, text).unwrap();
        store.append("s", &Message::assistant("b")).unwrap();

        let history = store.load("s").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "b");
    }

    #[test]
    fn ensure_session_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();

        let first = store.ensure_session("s", "llama", "mock").unwrap();
        let second = store.ensure_session("s", "qwen", "local-binary").unwrap();
        assert_eq!(first, second);
        assert_eq!(second.active_model_id, "llama");
    }

    #[test]
    fn update_metadata_preserves_creation_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        store.save_metadata(&meta("s", 100)).unwrap();

        store.update_metadata("s", "qwen", "llama-inproc").unwrap();
        let loaded = store.load_metadata("s").unwrap().unwrap();
        assert_eq!(loaded.created_at, 100);
        assert_eq!(loaded.active_model_id, "qwen");
        assert_eq!(loaded.runtime_name, "llama-inproc");
        assert!(loaded.updated_at >= 100);
        assert!(!dir.path().join(".s.meta.json.tmp").exists());
    }

    #[test]
    fn list_sessions_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        store.save_metadata(&meta("b", 200)).unwrap();
        store.save_metadata(&meta("a", 200)).unwrap();
        store.save_metadata(&meta("old", 100)).unwrap();
        std::fs::write(dir.path().join("bad.meta.json"), "{").unwrap();

        let ids: Vec<String> = store
            .list_sessions()
            .unwrap()
            .into_iter()
            .map(|m| m.session_id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "old"]);
    }

    #[test]
    fn session_ids_are_time_based() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        let id = store.create_session_id();
        let secs: u64 = id.strip_prefix("session-").unwrap().parse().unwrap();
        assert!(secs > 1_600_000_000);
    }
}
