//! CLI entry and dispatch.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tweety_core::config;

mod commands;

#[derive(Parser)]
#[command(name = "tweety")]
#[command(version = "0.1")]
#[command(about = "Local AI chat in your terminal")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Override the model from config
    #[arg(short, long, value_name = "MODEL_ID")]
    model: Option<String>,

    /// Override the system prompt from config
    #[arg(long)]
    system_prompt: Option<String>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// List available models
    Models,
    /// Delete the saved chat session
    Clear,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let _log_guard = init_logging();

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli).await })
}

/// Logs go to daily files under the tweety home, never to the terminal
/// the chat runs in. Returns None when the log directory cannot be created.
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let logs_dir = config::paths::logs_dir();
    std::fs::create_dir_all(&logs_dir).ok()?;

    let file = tracing_appender::rolling::daily(logs_dir, "tweety.log");
    let (writer, guard) = tracing_appender::non_blocking(file);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tweety=info,tweety_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Some(guard)
}

async fn dispatch(cli: Cli) -> Result<()> {
    let mut config = config::Config::load().context("load config")?;

    let Cli {
        command,
        model,
        system_prompt,
    } = cli;

    if let Some(model) = model {
        config.model = model;
    }
    if let Some(sp) = system_prompt {
        config.system_prompt = sp.trim().to_string();
    }

    // default to chat mode
    let Some(command) = command else {
        return commands::chat::run(&config).await;
    };

    match command {
        Commands::Models => commands::models::list(&config),
        Commands::Clear => commands::clear::run(),
        Commands::Config { command } => match command {
            ConfigCommands::Path => commands::config::path(),
            ConfigCommands::Init => commands::config::init(),
        },
    }
}
