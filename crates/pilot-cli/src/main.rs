//! pilot: let a model drive the desktop, one confirmed action at a time
//!
//! The model sees screenshots and proposes pointer and keyboard actions
//! through the `computer` tool; the operator approves them in the terminal.

mod agent;
mod conversation;
mod progress;
mod repl;
mod tools;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use pilot_core::config::FALLBACK_DISPLAY;
use pilot_core::{AnthropicClient, Config};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use agent::{AgentConfig, AgentLoop, AnthropicModel, TerminationReason, TerminationReport};
use tools::computer::ComputerTool;
use tools::desktop::{CommandDesktop, Desktop, ScreenSize};
use tools::failsafe::Failsafe;
use tools::security::{AutoApprove, ConfirmMode, ConfirmationHandler, TerminalConfirmation};

// ANSI colors
const GREEN: &str = "\x1b[92m";
const YELLOW: &str = "\x1b[93m";
const RED: &str = "\x1b[91m";
const DIM: &str = "\x1b[2m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

const ENV_FILE_NAME: &str = ".env.local";

#[derive(Debug, Parser)]
#[command(name = "pilot")]
#[command(about = "Desktop automation driven by a computer-use model", version)]
struct Cli {
    /// Task to perform; starts the interactive prompt when omitted
    task: Vec<String>,

    /// Read tasks interactively
    #[arg(short, long)]
    interactive: bool,

    /// Execute actions without asking for confirmation
    #[arg(long)]
    no_confirm: bool,

    /// Model to use (overrides config)
    #[arg(short, long)]
    model: Option<String>,

    /// Maximum model turns with actions per task
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    max_iterations: Option<u64>,

    /// Path to pilot.toml (default: discovered from the current directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Anthropic API key
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Write the conversation as JSON after each task
    #[arg(long, value_name = "PATH")]
    save_transcript: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Before parsing, so `--api-key` can fall back to a key kept in the file
    let env_file = std::env::current_dir()
        .ok()
        .and_then(|dir| load_env_file_from(&dir));
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    if let Some(ref path) = env_file {
        debug!(path = %path.display(), "Loaded environment file");
    }

    let config = load_config(&cli)?;
    let settings = Settings::resolve(&cli, &config);

    let desktop = CommandDesktop::detect()?;
    let screen = resolve_screen(&config, &desktop).await;

    let client = AnthropicClient::new(
        cli.api_key.clone().unwrap_or_default(),
        &config.anthropic.base_url,
        config.anthropic.beta_flag.clone(),
        config.anthropic.request_timeout_secs.map(Duration::from_secs),
    )?;
    let mut model = AnthropicModel::new(
        client,
        config.anthropic.tool_version.clone(),
        config.anthropic.max_tokens,
        screen,
    );
    if let Some(ref prompt) = config.agent.system_prompt {
        model = model.with_system_prompt(prompt.clone());
    }

    let failsafe = Failsafe::new();
    let _interrupts = failsafe.watch_ctrl_c();

    let computer = ComputerTool::new(Box::new(desktop), screen, failsafe.clone())
        .with_corner_failsafe(config.display.failsafe_corners);

    let confirmation: Arc<dyn ConfirmationHandler> = if settings.confirm_mode == ConfirmMode::Auto {
        Arc::new(AutoApprove)
    } else {
        Arc::new(TerminalConfirmation::new())
    };

    let agent_config = AgentConfig::new(settings.model.clone())
        .with_max_iterations(settings.max_iterations)
        .with_confirm_mode(settings.confirm_mode)
        .with_verbose(true);

    let agent = AgentLoop::new(
        Arc::new(model),
        Arc::new(computer),
        confirmation,
        failsafe.clone(),
        agent_config,
    );

    print_banner(&settings, screen);

    let task = cli.task.join(" ");
    if cli.interactive || task.trim().is_empty() {
        repl::run(&agent, &failsafe, cli.save_transcript.as_deref()).await?;
        return Ok(());
    }

    let report = agent.run(&task).await?;
    finish_task(&report, cli.save_transcript.as_deref());
    std::process::exit(report.exit_code());
}

/// Effective settings after merging CLI flags over the config file
#[derive(Debug, Clone)]
struct Settings {
    model: String,
    max_iterations: usize,
    confirm_mode: ConfirmMode,
}

impl Settings {
    fn resolve(cli: &Cli, config: &Config) -> Self {
        let confirm = config.agent.confirm && !cli.no_confirm;
        Self {
            model: cli.model.clone().unwrap_or_else(|| config.anthropic.model.clone()),
            max_iterations: cli
                .max_iterations
                .map(|n| n as usize)
                .unwrap_or(config.agent.max_iterations),
            confirm_mode: if confirm { ConfirmMode::Confirm } else { ConfirmMode::Auto },
        }
    }
}

/// Export variables from the nearest `.env.local`; variables already set win
fn load_env_file_from(dir: &Path) -> Option<PathBuf> {
    let path = dir
        .ancestors()
        .map(|d| d.join(ENV_FILE_NAME))
        .find(|p| p.is_file())?;
    dotenv::from_path(&path).ok()?;
    Some(path)
}

fn load_config(cli: &Cli) -> Result<Config> {
    match cli.config {
        Some(ref path) => Config::load_from(path),
        None => Config::load().context("Failed to load configuration"),
    }
}

/// Configured size, else what the display reports, else a fixed fallback
async fn resolve_screen(config: &Config, desktop: &dyn Desktop) -> ScreenSize {
    if let Some((width, height)) = config.display_size() {
        debug!(width, height, "Using configured display size");
        return ScreenSize { width, height };
    }

    match desktop.screen_size().await {
        Ok(size) => size,
        Err(e) => {
            let (width, height) = FALLBACK_DISPLAY;
            warn!(error = %e, width, height, "Could not detect screen size, using fallback");
            ScreenSize { width, height }
        }
    }
}

fn print_banner(settings: &Settings, screen: ScreenSize) {
    let confirmation = match settings.confirm_mode {
        ConfirmMode::Confirm => format!("{}on{}", GREEN, RESET),
        ConfirmMode::Auto => format!("{}off{}", YELLOW, RESET),
    };

    println!();
    println!("{}pilot{} - computer use agent", BOLD, RESET);
    println!("  {}Screen:{}        {}x{}", DIM, RESET, screen.width, screen.height);
    println!("  {}Model:{}         {}", DIM, RESET, settings.model);
    println!("  {}Confirmation:{}  {}", DIM, RESET, confirmation);
    println!("  {}Failsafe:{}      Ctrl+C or move the pointer into a screen corner", DIM, RESET);
}

/// Print the outcome and write the transcript if requested
pub(crate) fn finish_task(report: &TerminationReport, transcript: Option<&Path>) {
    let color = match report.reason {
        TerminationReason::Completed => GREEN,
        TerminationReason::ModelError => RED,
        TerminationReason::IterationLimit | TerminationReason::AbortedByUser => YELLOW,
    };
    println!(
        "\n{}Finished:{} {} after {} iteration(s), {} action(s)",
        color,
        RESET,
        report.reason,
        report.iterations,
        report.conversation.observation_count()
    );
    if let Some(ref error) = report.error {
        println!("{}Error:{} {}", RED, RESET, error);
    }

    if let Some(path) = transcript {
        match report.conversation.save_transcript(path) {
            Ok(()) => println!("{}Transcript:{} {}", DIM, RESET, path.display()),
            Err(e) => eprintln!("{}Warning:{} {:#}", YELLOW, RESET, e),
        }
    }
}
