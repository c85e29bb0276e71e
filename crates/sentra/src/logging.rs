//! Tracing setup for the binary.
//!
//! Log events are captured into a [`LogBuffer`] instead of being written to
//! the terminal directly. The REPL drains the buffer between turns so log
//! lines never interleave with streamed tokens.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::Local;
use tracing::Subscriber;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

/// Maximum buffered log lines.
pub const MAX_LOG_LINES: usize = 2000;
/// Trim to this many when the cap is exceeded.
pub const LOG_TRIM_TO: usize = 1200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Short fixed-width label for display.
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO ",
            LogLevel::Warn => "WARN ",
            LogLevel::Error => "ERROR",
        }
    }
}

impl From<tracing::Level> for LogLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => LogLevel::Trace,
            tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

/// One captured log event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub time: String,
    pub level: LogLevel,
    pub message: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}] {}", self.time, self.level.label(), self.message)
    }
}

/// Shared buffer of log lines.
///
/// Holds two views: `pending` (not yet shown) and `history` (everything
/// recent, for `/logs`). Both are capped at [`MAX_LOG_LINES`].
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Buffers>>);

#[derive(Default)]
struct Buffers {
    pending: Vec<LogLine>,
    history: Vec<LogLine>,
}

fn push_capped(lines: &mut Vec<LogLine>, line: LogLine) {
    lines.push(line);
    if lines.len() > MAX_LOG_LINES {
        let trim_to = lines.len() - LOG_TRIM_TO;
        lines.drain(..trim_to);
    }
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: LogLine) {
        let mut buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        push_capped(&mut buf.pending, line.clone());
        push_capped(&mut buf.history, line);
    }

    /// Take every line not yet drained.
    pub fn drain(&self) -> Vec<LogLine> {
        let mut buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut buf.pending)
    }

    /// The last `n` lines seen, drained or not.
    pub fn tail(&self, n: usize) -> Vec<LogLine> {
        let buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        let start = buf.history.len().saturating_sub(n);
        buf.history[start..].to_vec()
    }
}

/// A [`tracing_subscriber::Layer`] that captures events into a [`LogBuffer`].
pub struct CaptureLayer {
    buffer: LogBuffer,
}

impl CaptureLayer {
    /// Create a layer and the buffer it writes to.
    pub fn new() -> (Self, LogBuffer) {
        let buffer = LogBuffer::new();
        (
            Self {
                buffer: buffer.clone(),
            },
            buffer,
        )
    }
}

impl<S: Subscriber + for<'a> LookupSpan<'a>> Layer<S> for CaptureLayer {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let mut message = visitor.message;
        if !visitor.fields.is_empty() {
            let extras: Vec<String> = visitor
                .fields
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            if message.is_empty() {
                message = extras.join(" ");
            } else {
                message = format!("{message} {{{}}}", extras.join(", "));
            }
        }

        self.buffer.push(LogLine {
            time: Local::now().format("%H:%M:%S").to_string(),
            level: (*event.metadata().level()).into(),
            message,
        });
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        let rendered = format!("{value:?}");
        if field.name() == "message" {
            self.message = rendered;
        } else {
            self.fields.push((field.name().to_string(), rendered));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields
                .push((field.name().to_string(), value.to_string()));
        }
    }
}

/// Filter used by [`init`]: `RUST_LOG` if set, else `debug` when verbose,
/// else `warn`.
pub fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }))
}

/// Install the global subscriber and return the buffer it fills.
pub fn init(verbose: bool) -> LogBuffer {
    let (layer, buffer) = CaptureLayer::new();
    let installed = tracing_subscriber::registry()
        .with(env_filter(verbose))
        .with(layer)
        .try_init();
    if installed.is_err() {
        eprintln!("warning: a tracing subscriber is already installed");
    }
    buffer
}
