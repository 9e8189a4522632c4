//! ActionGate CLI: run model-issued file and shell actions inside a guarded workspace.

mod commands;
mod terminal;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// ActionGate: guarded execution of model-issued actions
#[derive(Parser, Debug)]
#[command(name = "actiongate", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Accept every confirmation without asking
    #[arg(short, long, global = true)]
    yes: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Print the actions found in a saved response as JSON
    Parse {
        /// Response file, or `-` for stdin
        input: PathBuf,
    },
    /// Execute the actions in a saved response
    Run {
        /// Response file, or `-` for stdin
        input: PathBuf,
    },
    /// Ask the model and execute the actions it replies with
    Chat {
        /// Task for the model
        task: String,
    },
    /// Ask for a whole-file change set, then review and apply it
    Propose {
        /// Task for the model
        task: String,
    },
    /// Let the model request tools one at a time, each approved by you
    Approve {
        /// Task for the model
        task: String,
    },
    /// Write a default .actiongate/config.toml into the workspace
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "actiongate", "actiongate")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "actiongate.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    // Resolve workspace
    let workspace = cli
        .workspace
        .canonicalize()
        .map_err(|e| anyhow::anyhow!("Workspace '{}': {}", cli.workspace.display(), e))?;

    let options = commands::Options {
        workspace,
        config_file: cli.config,
        yes: cli.yes,
        quiet: cli.quiet,
    };
    commands::handle_command(cli.command, options).await
}
