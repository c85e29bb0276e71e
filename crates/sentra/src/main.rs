//! Chat with a local model from the terminal.
//!
//! # Examples
//!
//! ```sh
//! # Interactive session using ./sentra.json (defaults if absent)
//! sentra
//!
//! # Resume a session with a specific backend and profile
//! sentra --session session-1718000000 --runtime local-binary --profile fast
//!
//! # One turn, then exit (status 1 on failure)
//! sentra --model llama31_8b_q4km --prompt "Explain prefix caching"
//! ```

use std::io;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use sentra::config::AppConfig;
use sentra::orchestrator::Orchestrator;
use sentra::repl::Repl;
use sentra::session::SessionStore;
use tracing::info;

/// Local-first terminal chat over interchangeable inference backends.
#[derive(Parser)]
#[command(name = "sentra", version)]
struct Cli {
    /// JSON configuration file
    #[arg(long, default_value = "sentra.json")]
    config: PathBuf,

    /// Resume this session id instead of starting a new one
    #[arg(long)]
    session: Option<String>,

    /// Preferred runtime: llama-inproc, local-binary or mock
    #[arg(long)]
    runtime: Option<String>,

    /// Apply a profile at startup: fast, balanced or quality
    #[arg(long)]
    profile: Option<String>,

    /// Activate this model id at startup
    #[arg(long)]
    model: Option<String>,

    /// Run a single turn with this prompt and exit
    #[arg(long)]
    prompt: Option<String>,

    /// Debug-level logging (RUST_LOG overrides)
    #[arg(long, short)]
    verbose: bool,
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {message}");
    process::exit(1);
}

fn main() {
    let cli = Cli::parse();
    let logs = sentra::logging::init(cli.verbose);

    let mut config = AppConfig::load(&cli.config).unwrap_or_else(|e| fail(e));
    if let Some(runtime) = &cli.runtime {
        config.runtime_preference = runtime.clone();
    }
    // The profile in the file selects sampling; `--profile` also applies the
    // token settings below.
    if let Some(profile) = &cli.profile {
        config.profile = profile.clone();
    }
    let system_prompt = config.system_prompt.clone();
    let sessions_dir = config.sessions_dir.clone();

    let mut orchestrator = Orchestrator::from_config(config).unwrap_or_else(|e| fail(e));
    if let Some(model) = &cli.model {
        orchestrator
            .set_active_model(model)
            .unwrap_or_else(|e| fail(e));
    }
    if let Some(profile) = &cli.profile {
        orchestrator.set_profile(profile).unwrap_or_else(|e| fail(e));
    }
    info!(
        runtime = orchestrator.active_runtime_name(),
        profile = orchestrator.profile_label(),
        "orchestrator ready"
    );

    let store = SessionStore::new(sessions_dir).unwrap_or_else(|e| fail(e));
    let stdout = io::stdout();
    let mut repl = Repl::new(
        orchestrator,
        store,
        cli.session.clone(),
        &system_prompt,
        stdout.lock(),
    )
    .unwrap_or_else(|e| fail(e))
    .with_log_buffer(logs);

    if let Some(prompt) = &cli.prompt {
        if let Err(e) = repl.one_shot(prompt) {
            fail(e);
        }
        return;
    }

    if let Err(e) = repl.run(io::stdin().lock()) {
        fail(e);
    }
}
