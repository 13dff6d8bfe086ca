use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info};

use voice_commander::chat::ChatSession;
use voice_commander::command::{self, ParseOutcome};
use voice_commander::config::Config;
use voice_commander::controller::{Controller, TurnOutcome, report, run_text};
use voice_commander::dispatch::{Dispatcher, SystemLauncher};
use voice_commander::logging::init_logging;
use voice_commander::ollama::OllamaClient;

/// Speak or type a request, let a local model turn it into desktop actions.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Model to chat with (overrides config and OLLAMA_MODEL)
    #[arg(short, long)]
    model: Option<String>,

    /// Base URL of the Ollama host (overrides config and OLLAMA_BASE_URL)
    #[arg(short, long)]
    base_url: Option<String>,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Type requests line by line (default)
    Text,
    /// Push-to-talk voice requests
    Voice,
    /// Run a JSON command batch directly, without the model
    Exec {
        /// JSON array of command objects
        payload: String,
    },
    /// Check that the model host is reachable and which model will be used
    Check,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = if let Some(path) = &args.config {
        Config::from_file(path).context(format!("Reading config {}", path.display()))?
    } else {
        Config::load_or_write_default(None)?
    };
    match dotenvy::dotenv() {
        Ok(path) => debug!("Loaded environment from {}", path.display()),
        Err(e) => debug!("No .env loaded: {e}"),
    }
    config.apply_env(|name| std::env::var(name).ok());
    config.apply_overrides(args.model.clone(), args.base_url.clone());
    Ok(config)
}

fn exec(config: &Config, payload: &str) -> ExitCode {
    let batch = match command::parse(payload) {
        Ok(batch) => batch,
        Err(ParseOutcome::NotACommandBatch) => {
            eprintln!("Error: expected a JSON array of commands.");
            return ExitCode::FAILURE;
        }
    };
    let dispatcher = Dispatcher::new(SystemLauncher::new(&config.dispatch));
    let outcome = TurnOutcome::Dispatched(dispatcher.execute_all(batch));
    report(config, &outcome);
    if outcome.failures() == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(feature = "voice")]
async fn run_voice(
    config: &Config,
    controller: Controller<OllamaClient, SystemLauncher>,
) -> Result<()> {
    let mut app = voice_commander::app::VoiceApp::new(config, controller)
        .await
        .context("Failed to create application")?;
    app.run().await
}

#[cfg(not(feature = "voice"))]
async fn run_voice(
    _config: &Config,
    _controller: Controller<OllamaClient, SystemLauncher>,
) -> Result<()> {
    anyhow::bail!("voice mode needs a build with the `voice` feature")
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_logging();
    let args = Args::parse();
    let config = load_config(&args)?;
    info!(
        "Using model host {} with model {}",
        config.ollama.base_url, config.ollama.model
    );

    let mode = args.mode.unwrap_or(Mode::Text);
    if let Mode::Exec { payload } = &mode {
        return Ok(exec(&config, payload));
    }

    let mut session = ChatSession::new(OllamaClient::new(&config.ollama), &config.ollama.model);
    if !session.check_endpoint_reachable().await {
        eprintln!("Cannot connect to the model host at {}", config.ollama.base_url);
        eprintln!("Make sure Ollama is running with: ollama serve");
        return Ok(ExitCode::FAILURE);
    }
    println!("Using model: {}", session.model());

    let mut controller = Controller::new(
        session,
        Dispatcher::new(SystemLauncher::new(&config.dispatch)),
    );
    match mode {
        Mode::Check | Mode::Exec { .. } => {}
        Mode::Text => {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            run_text(&mut controller, &config, stdin).await?;
        }
        Mode::Voice => run_voice(&config, controller).await?,
    }
    Ok(ExitCode::SUCCESS)
}
