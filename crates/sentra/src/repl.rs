//! Line-oriented chat shell.
//!
//! Plain lines are chat turns; lines starting with `/` are [`Command`]s.
//! Turn discipline: the user message is logged before generation, the reply
//! and session metadata only after it succeeds. A failed turn is reported and
//! the loop continues.

use std::io::{BufRead, Write};

use chrono::DateTime;
use tracing::{debug, warn};

use crate::logging::LogBuffer;
use crate::models::ModelDescriptor;
use crate::orchestrator::Orchestrator;
use crate::profile::Profile;
use crate::session::SessionStore;
use crate::{GenerationResult, Message, Result};

/// Lines shown by `/logs`.
const LOG_TAIL: usize = 50;

const HELP: &str = "\
commands:
  /help                                   show this help
  /exit, /quit                            leave
  /session                                current session id
  /session list                           all sessions, newest first
  /models                                 list catalog models
  /model current                          show the active model
  /model use <id|n>                       switch model by id or list number
  /model add <id> <repo> <file> [path]    register a model (path defaults to ./models/<file>)
  /model validate                         check the active model file
  /profile [fast|balanced|quality]        show or apply a profile
  /tokens [max] [ctx]                     show or set reply length and context window
  /runtime                                show the active runtime
  /history                                print this session's messages
  /logs                                   recent log lines";

// ── Commands ───────────────────────────────────────────────────────

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Exit,
    Session,
    SessionList,
    Models,
    ModelCurrent,
    /// Id or 1-based list number.
    ModelUse(String),
    ModelAdd {
        id: String,
        repo: String,
        file: String,
        path: Option<String>,
    },
    ModelValidate,
    Profile(Option<String>),
    Tokens {
        max: Option<usize>,
        ctx: Option<usize>,
    },
    Runtime,
    History,
    Logs,
}

impl Command {
    /// Parse a line starting with `/`. `Err` carries a usage message.
    pub fn parse(line: &str) -> std::result::Result<Self, String> {
        let mut words = line.split_whitespace();
        let head = words.next().unwrap_or_default();
        let args: Vec<&str> = words.collect();

        let cmd = match (head, args.as_slice()) {
            ("/help", []) => Command::Help,
            ("/exit" | "/quit", []) => Command::Exit,
            ("/session", []) => Command::Session,
            ("/session", ["list"]) => Command::SessionList,
            ("/models", []) => Command::Models,
            ("/model", ["current"]) => Command::ModelCurrent,
            ("/model", ["use", target]) => Command::ModelUse((*target).to_string()),
            ("/model", ["use", ..]) => return Err("usage: /model use <id|n>".to_string()),
            ("/model", ["add", id, repo, file, rest @ ..]) if rest.len() <= 1 => {
                Command::ModelAdd {
                    id: (*id).to_string(),
                    repo: (*repo).to_string(),
                    file: (*file).to_string(),
                    path: rest.first().map(|p| (*p).to_string()),
                }
            }
            ("/model", ["add", ..]) => {
                return Err("usage: /model add <id> <repo> <file> [local-path]".to_string());
            }
            ("/model", ["validate"]) => Command::ModelValidate,
            ("/model", _) => {
                return Err("usage: /model current|use|add|validate".to_string());
            }
            ("/profile", []) => Command::Profile(None),
            ("/profile", [name]) => Command::Profile(Some((*name).to_string())),
            ("/tokens", rest) if rest.len() <= 2 => {
                let parse = |s: &&str| {
                    s.parse::<usize>()
                        .map_err(|_| format!("not a number: {s} (usage: /tokens [max] [ctx])"))
                };
                Command::Tokens {
                    max: rest.first().map(parse).transpose()?,
                    ctx: rest.get(1).map(parse).transpose()?,
                }
            }
            ("/runtime", []) => Command::Runtime,
            ("/history", []) => Command::History,
            ("/logs", []) => Command::Logs,
            _ => return Err(format!("unknown command: {line} (try /help)")),
        };
        Ok(cmd)
    }
}

/// Whether the loop keeps going after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

// ── Repl ───────────────────────────────────────────────────────────

pub struct Repl<W: Write> {
    orchestrator: Orchestrator,
    store: SessionStore,
    session_id: String,
    history: Vec<Message>,
    logs: Option<LogBuffer>,
    out: W,
}

impl<W: Write> Repl<W> {
    /// Open (or start) a session. A new session gets `system_prompt` as its
    /// first message.
    pub fn new(
        orchestrator: Orchestrator,
        store: SessionStore,
        session_id: Option<String>,
        system_prompt: &str,
        out: W,
    ) -> Result<Self> {
        let session_id = session_id.unwrap_or_else(|| store.create_session_id());
        let mut history = store.load(&session_id)?;
        if history.is_empty() && !system_prompt.is_empty() {
            let system = Message::system(system_prompt);
            store.append(&session_id, &system)?;
            history.push(system);
        }
        let model_id = orchestrator
            .active_model()
            .map(|m| m.id.clone())
            .unwrap_or_default();
        store.ensure_session(&session_id, &model_id, orchestrator.active_runtime_name())?;
        debug!(session = %session_id, messages = history.len(), "session opened");

        Ok(Self {
            orchestrator,
            store,
            session_id,
            history,
            logs: None,
            out,
        })
    }

    /// Print captured log lines between turns.
    pub fn with_log_buffer(mut self, logs: LogBuffer) -> Self {
        self.logs = Some(logs);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Consume the shell and hand back its output sink.
    pub fn into_output(self) -> W {
        self.out
    }

    /// Print the banner, then read lines until EOF or `/exit`.
    pub fn run<R: BufRead>(&mut self, input: R) -> Result<()> {
        writeln!(
            self.out,
            "sentra | session {} | runtime {} | model {}",
            self.session_id,
            self.orchestrator.active_runtime_name(),
            self.orchestrator
                .active_model()
                .map_or("none", |m| m.id.as_str()),
        )?;
        if !self.orchestrator.runtime_selection_note().is_empty() {
            writeln!(self.out, "note: {}", self.orchestrator.runtime_selection_note())?;
        }
        writeln!(self.out, "type /help for commands")?;
        self.flush_logs()?;

        for line in input.lines() {
            let line = line?;
            if self.handle_line(&line)? == Flow::Exit {
                break;
            }
        }
        Ok(())
    }

    /// Handle one input line.
    pub fn handle_line(&mut self, line: &str) -> Result<Flow> {
        let line = line.trim();
        let flow = if line.is_empty() {
            Flow::Continue
        } else if line.starts_with('/') {
            match Command::parse(line) {
                Ok(cmd) => self.execute(cmd)?,
                Err(usage) => {
                    writeln!(self.out, "{usage}")?;
                    Flow::Continue
                }
            }
        } else {
            if let Err(e) = self.turn(line) {
                warn!("turn failed: {e}");
                writeln!(self.out, "error: {e}")?;
            }
            Flow::Continue
        };
        self.flush_logs()?;
        self.out.flush()?;
        Ok(flow)
    }

    /// Run a single chat turn for `--prompt` mode.
    pub fn one_shot(&mut self, prompt: &str) -> Result<GenerationResult> {
        let result = self.turn(prompt);
        self.flush_logs()?;
        self.out.flush()?;
        result
    }

    // ── Turns ──────────────────────────────────────────────────────

    fn turn(&mut self, text: &str) -> Result<GenerationResult> {
        let user = Message::user(text);
        self.store.append(&self.session_id, &user)?;
        self.history.push(user);

        let out = &mut self.out;
        // Streaming is best-effort; a broken terminal surfaces on the next
        // checked write below.
        let result = self.orchestrator.respond(&self.history, &mut |piece| {
            let _ = out.write_all(piece.as_bytes());
            let _ = out.flush();
        })?;
        writeln!(self.out)?;

        let reply = Message::assistant(result.text.clone());
        self.store.append(&self.session_id, &reply)?;
        self.history.push(reply);
        self.update_metadata()?;

        writeln!(
            self.out,
            "[perf] first_token={:.0}ms total={:.0}ms tokens/s={:.1}",
            result.first_token_ms, result.total_ms, result.tokens_per_second
        )?;
        if !result.warning.is_empty() {
            writeln!(self.out, "[warn] {}", result.warning)?;
        }
        Ok(result)
    }

    fn update_metadata(&self) -> Result<()> {
        let model_id = self
            .orchestrator
            .active_model()
            .map(|m| m.id.clone())
            .unwrap_or_default();
        self.store.update_metadata(
            &self.session_id,
            &model_id,
            self.orchestrator.active_runtime_name(),
        )
    }

    fn flush_logs(&mut self) -> Result<()> {
        let Some(logs) = &self.logs else {
            return Ok(());
        };
        for line in logs.drain() {
            writeln!(self.out, "{line}")?;
        }
        Ok(())
    }

    // ── Commands ───────────────────────────────────────────────────

    fn execute(&mut self, cmd: Command) -> Result<Flow> {
        match cmd {
            Command::Help => writeln!(self.out, "{HELP}")?,
            Command::Exit => return Ok(Flow::Exit),
            Command::Session => {
                writeln!(self.out, "session: {}", self.session_id)?;
                writeln!(self.out, "dir: {}", self.store.dir().display())?;
            }
            Command::SessionList => self.list_sessions()?,
            Command::Models => self.list_models()?,
            Command::ModelCurrent => match self.orchestrator.active_model() {
                Some(m) => writeln!(self.out, "{}", describe_model(m))?,
                None => writeln!(self.out, "no active model")?,
            },
            Command::ModelUse(target) => self.use_model(&target)?,
            Command::ModelAdd {
                id,
                repo,
                file,
                path,
            } => {
                let path = path.unwrap_or_else(|| format!("./models/{file}"));
                let descriptor = ModelDescriptor::new(id.clone(), repo, file, path);
                match self.orchestrator.add_model(descriptor) {
                    Ok(()) => writeln!(
                        self.out,
                        "added model {id} (catalog: {})",
                        self.orchestrator.models_file_path().display()
                    )?,
                    Err(e) => writeln!(self.out, "error: {e}")?,
                }
            }
            Command::ModelValidate => match self.orchestrator.validate_active_model() {
                Ok(report) => writeln!(self.out, "{report}")?,
                Err(reason) => writeln!(self.out, "validation failed: {reason}")?,
            },
            Command::Profile(None) => {
                writeln!(
                    self.out,
                    "profile: {} (available: {})",
                    self.orchestrator.profile_label(),
                    Profile::ALL.map(Profile::as_str).join("|")
                )?;
                self.print_tokens()?;
            }
            Command::Profile(Some(name)) => match self.orchestrator.set_profile(&name) {
                Ok(()) => {
                    writeln!(self.out, "profile: {}", self.orchestrator.profile_label())?;
                    self.print_tokens()?;
                }
                Err(e) => writeln!(self.out, "error: {e}")?,
            },
            Command::Tokens { max, ctx } => {
                if let Some(max) = max {
                    self.orchestrator.set_max_tokens(max);
                }
                if let Some(ctx) = ctx {
                    self.orchestrator.set_context_window_tokens(ctx);
                }
                self.print_tokens()?;
            }
            Command::Runtime => {
                writeln!(self.out, "runtime: {}", self.orchestrator.active_runtime_name())?;
                let note = self.orchestrator.runtime_selection_note();
                if !note.is_empty() {
                    writeln!(self.out, "note: {note}")?;
                }
            }
            Command::History => {
                for msg in &self.history {
                    writeln!(self.out, "{}: {}", msg.role, msg.content)?;
                }
            }
            Command::Logs => match &self.logs {
                Some(logs) => {
                    for line in logs.tail(LOG_TAIL) {
                        writeln!(self.out, "{line}")?;
                    }
                }
                None => writeln!(self.out, "log capture is off")?,
            },
        }
        Ok(Flow::Continue)
    }

    fn print_tokens(&mut self) -> Result<()> {
        writeln!(
            self.out,
            "max_tokens={} context_window={} prompt_budget={}",
            self.orchestrator.max_tokens(),
            self.orchestrator.context_window_tokens(),
            self.orchestrator.prompt_token_budget()
        )?;
        Ok(())
    }

    fn list_models(&mut self) -> Result<()> {
        let active = self.orchestrator.active_model().map(|m| m.id.clone());
        if self.orchestrator.models().is_empty() {
            writeln!(self.out, "no models in catalog")?;
        }
        for (i, m) in self.orchestrator.models().iter().enumerate() {
            let marker = if active.as_deref() == Some(m.id.as_str()) {
                '*'
            } else {
                ' '
            };
            writeln!(self.out, "{marker} {}. {}", i + 1, describe_model(m))?;
        }
        Ok(())
    }

    fn use_model(&mut self, target: &str) -> Result<()> {
        let id = match target.parse::<usize>() {
            Ok(n) if n >= 1 && n <= self.orchestrator.models().len() => {
                self.orchestrator.models()[n - 1].id.clone()
            }
            _ => target.to_string(),
        };
        match self.orchestrator.set_active_model(&id) {
            Ok(()) => {
                self.update_metadata()?;
                writeln!(self.out, "active model: {id}")?;
            }
            Err(e) => writeln!(self.out, "error: {e}")?,
        }
        Ok(())
    }

    fn list_sessions(&mut self) -> Result<()> {
        let sessions = self.store.list_sessions()?;
        if sessions.is_empty() {
            writeln!(self.out, "no sessions")?;
        }
        for s in sessions {
            let created = DateTime::from_timestamp(i64::try_from(s.created_at).unwrap_or(0), 0)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            let marker = if s.session_id == self.session_id { '*' } else { ' ' };
            writeln!(
                self.out,
                "{marker} {}  {created}  model={} runtime={}",
                s.session_id, s.active_model_id, s.runtime_name
            )?;
        }
        Ok(())
    }
}

fn describe_model(m: &ModelDescriptor) -> String {
    format!(
        "{} ({}) {} [{}]",
        m.id,
        m.name,
        m.local_path.display(),
        if m.is_ready() { "ready" } else { "missing" }
    )
}
