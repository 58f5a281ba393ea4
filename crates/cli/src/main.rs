//! Cadence CLI — the main entry point.
//!
//! Commands:
//! - `loop`    — Manage scheduled loops
//! - `runs`    — Inspect execution history
//! - `sweep`   — Remove executions past retention
//! - `daemon`  — Run the scheduler and sweeper until interrupted
//! - `context` — Preview an assembled context from a transcript
//! - `config`  — Show or initialize configuration

use cadence_config::AppConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod app;
mod commands;
mod snapshot;

#[derive(Parser)]
#[command(
    name = "cadence",
    about = "Cadence — scheduled LLM loops and bounded context assembly",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.cadence/config.toml)
    #[arg(short, long, global = true, env = "CADENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage scheduled loops
    #[command(subcommand)]
    Loop(LoopCommand),

    /// Inspect execution history
    #[command(subcommand)]
    Runs(RunsCommand),

    /// Remove execution records past retention
    Sweep,

    /// Run the scheduler and sweeper until Ctrl-C
    Daemon,

    /// Context assembly tools
    #[command(subcommand)]
    Context(ContextCommand),

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum LoopCommand {
    /// Create or replace a loop
    Add {
        id: String,
        /// Cron expression, e.g. "0 8 * * *"
        schedule: String,
        prompt: String,
        /// Create the loop paused
        #[arg(long)]
        paused: bool,
    },
    /// List all loops
    List,
    /// Show one loop and its recent runs
    Show { id: String },
    /// Delete a loop (its execution history is kept)
    Remove { id: String },
    /// Stop scheduling a loop
    Pause { id: String },
    /// Resume scheduling a loop
    Resume { id: String },
    /// Preview upcoming fire times
    Next {
        id: String,
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
    },
    /// Run a loop once, now
    Run { id: String },
}

#[derive(Subcommand)]
enum RunsCommand {
    /// List executions, newest first
    List {
        /// Only runs of this loop
        #[arg(long = "loop")]
        loop_id: Option<String>,
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one execution and its traces
    Show {
        execution_id: String,
        /// Print full trace payloads
        #[arg(long)]
        traces: bool,
    },
}

#[derive(Subcommand)]
enum ContextCommand {
    /// Assemble the context for a transcript file and print it
    Preview {
        /// JSON transcript: a message array or {"session": .., "messages": [..]}
        transcript: PathBuf,
        /// Optional JSON knowledge snapshot: {"domains": [..], "symbols": [..]}
        #[arg(long)]
        knowledge: Option<PathBuf>,
        /// Override the base system prompt
        #[arg(long)]
        system: Option<String>,
        /// Print the full message sequence as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Validate the configuration
    Validate,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the config file path
    Path,
}

fn config_path(cli_path: Option<PathBuf>) -> PathBuf {
    cli_path.unwrap_or_else(AppConfig::config_path)
}

fn init_logging(config: Option<&AppConfig>, verbose: bool) {
    let default_level = if verbose {
        "debug".to_string()
    } else {
        config.map_or_else(|| "info".to_string(), |c| c.logging.level.clone())
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if config.is_some_and(|c| c.logging.json) {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let path = config_path(cli.config);

    // Config commands must work even when the file is broken
    let command = match cli.command {
        Commands::Config(command) => {
            init_logging(None, cli.verbose);
            return match command {
                ConfigCommand::Show => commands::config_cmd::show(&path).await,
                ConfigCommand::Validate => commands::config_cmd::validate(&path).await,
                ConfigCommand::Init { force } => commands::config_cmd::init(&path, force).await,
                ConfigCommand::Path => commands::config_cmd::path(&path).await,
            };
        }
        other => other,
    };

    let config = AppConfig::load_with_env(&path)
        .map_err(|e| format!("Failed to load config from {}: {e}", path.display()))?;
    init_logging(Some(&config), cli.verbose);

    match command {
        Commands::Loop(command) => match command {
            LoopCommand::Add {
                id,
                schedule,
                prompt,
                paused,
            } => commands::loop_cmd::add(&config, &id, &schedule, &prompt, !paused).await?,
            LoopCommand::List => commands::loop_cmd::list(&config).await?,
            LoopCommand::Show { id } => commands::loop_cmd::show(&config, &id).await?,
            LoopCommand::Remove { id } => commands::loop_cmd::remove(&config, &id).await?,
            LoopCommand::Pause { id } => commands::loop_cmd::set_enabled(&config, &id, false).await?,
            LoopCommand::Resume { id } => commands::loop_cmd::set_enabled(&config, &id, true).await?,
            LoopCommand::Next { id, count } => commands::loop_cmd::next(&config, &id, count).await?,
            LoopCommand::Run { id } => commands::loop_cmd::run(&config, &id).await?,
        },
        Commands::Runs(command) => match command {
            RunsCommand::List { loop_id, limit } => {
                commands::runs::list(&config, loop_id.as_deref(), limit).await?
            }
            RunsCommand::Show {
                execution_id,
                traces,
            } => commands::runs::show(&config, &execution_id, traces).await?,
        },
        Commands::Sweep => commands::sweep::run(&config).await?,
        Commands::Daemon => commands::daemon::run(&config).await?,
        Commands::Context(ContextCommand::Preview {
            transcript,
            knowledge,
            system,
            json,
        }) => {
            commands::context::preview(&config, &transcript, knowledge.as_deref(), system, json)
                .await?
        }
        Commands::Config(_) => {}
    }

    Ok(())
}
