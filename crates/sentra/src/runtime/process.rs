//! External-process backend: runs a command template through `sh -c`.
//!
//! The template names three placeholders:
//!
//! | Placeholder | Substituted with |
//! |-------------|------------------|
//! | `{prompt}` | rendered prompt, single-quoted |
//! | `{model_path}` | model file path, single-quoted |
//! | `{max_tokens}` | reply token limit |
//!
//! Substitution is a single left-to-right pass, so placeholder text inside
//! the prompt is never expanded a second time.

use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use super::{GenerationClock, LOCAL_BINARY_RUNTIME_NAME, Runtime, render_prompt, shell_quote};
use crate::context::estimate_tokens;
use crate::{GenerationRequest, GenerationResult, Result, SentraError};

const PLACEHOLDERS: [&str; 3] = ["{prompt}", "{model_path}", "{max_tokens}"];

/// Backend that shells out to a local inference binary.
#[derive(Debug, Clone)]
pub struct LocalBinaryRuntime {
    template: String,
    /// Why the template cannot be used, computed once at construction.
    unavailable_reason: Option<String>,
}

impl LocalBinaryRuntime {
    pub fn new(template: impl Into<String>) -> Self {
        let template = template.into();
        let unavailable_reason = check_template(&template).err();
        if let Some(reason) = &unavailable_reason {
            debug!("local-binary unavailable: {reason}");
        }
        Self {
            template,
            unavailable_reason,
        }
    }

    /// The shell command `generate` would run for `request`.
    #[allow(clippy::string_slice)] // slicing past ASCII '{' and placeholder text
    pub fn render_command(&self, request: &GenerationRequest) -> String {
        let prompt = shell_quote(&render_prompt(&request.messages));
        let model_path = shell_quote(&request.model_path.to_string_lossy());
        let max_tokens = request.max_tokens.to_string();

        let mut out = String::with_capacity(self.template.len() + prompt.len());
        let mut rest = self.template.as_str();
        while let Some(pos) = rest.find('{') {
            let (head, tail) = rest.split_at(pos);
            out.push_str(head);
            let replacement = PLACEHOLDERS
                .iter()
                .zip([&prompt, &model_path, &max_tokens])
                .find(|(ph, _)| tail.starts_with(**ph));
            match replacement {
                Some((ph, value)) => {
                    out.push_str(value);
                    rest = &tail[ph.len()..];
                }
                None => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// Validate a command template: all placeholders present, braces balanced,
/// leading executable resolvable.
fn check_template(template: &str) -> std::result::Result<(), String> {
    if template.trim().is_empty() {
        return Err("no command template configured".to_string());
    }
    for ph in PLACEHOLDERS {
        if !template.contains(ph) {
            return Err(format!("command template is missing {ph}"));
        }
    }

    let mut depth: i32 = 0;
    for c in template.chars() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return Err("command template has unbalanced braces".to_string());
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err("command template has unbalanced braces".to_string());
    }

    let exe = template.split_whitespace().next().unwrap_or_default();
    if exe.contains('{') {
        return Err("command template must start with an executable".to_string());
    }
    if exe.contains('/') {
        if Path::new(exe).exists() {
            Ok(())
        } else {
            Err(format!("executable not found: {exe}"))
        }
    } else {
        which::which(exe)
            .map(|_| ())
            .map_err(|_| format!("executable not found on PATH: {exe}"))
    }
}

impl Runtime for LocalBinaryRuntime {
    fn name(&self) -> &str {
        LOCAL_BINARY_RUNTIME_NAME
    }

    fn is_available(&self) -> bool {
        self.unavailable_reason.is_none()
    }

    fn generate(
        &self,
        request: &GenerationRequest,
        on_token: &mut dyn FnMut(&str),
    ) -> Result<GenerationResult> {
        if let Some(reason) = &self.unavailable_reason {
            return Err(SentraError::runtime_unavailable(self.name(), reason.clone()));
        }
        if request.model_path.as_os_str().is_empty() {
            return Err(SentraError::generation(
                self.name(),
                "requires a non-empty model_path",
            ));
        }

        let mut clock = GenerationClock::start();
        let cmd = self.render_command(request);
        debug!("local-binary: running {} byte command", cmd.len());

        // Group the command so stderr lands in the same stream as stdout.
        let output = Command::new("sh")
            .arg("-c")
            .arg(format!("{{ {cmd}\n}} 2>&1"))
            .stdin(Stdio::null())
            .output()
            .map_err(|e| SentraError::generation(self.name(), format!("failed to spawn: {e}")))?;

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            text.push_str(&stderr);
        }

        if !output.status.success() {
            warn!("local-binary exited with {}", output.status);
            return Err(SentraError::generation(
                self.name(),
                format!("command exited with {}:\n{text}", output.status),
            ));
        }

        if !text.is_empty() {
            clock.mark_fragment();
            on_token(&text);
        }
        let generated = estimate_tokens(&text);
        Ok(clock.finish(text, generated))
    }
}
