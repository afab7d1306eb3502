//! Abylebot CLI entry point.
//!
//! # Commands
//!
//! - `abylebot run [--logs] [--config PATH]` connect the enabled bots and run the plugins
//! - `abylebot status` show the config path and per-backend configuration
//! - `abylebot plugins` validate every plugin entry

mod helpers;
mod plugins_cmd;
mod run;
mod status;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// Abylebot: one plugin host for Discord, Slack and Matrix bots
#[derive(Parser)]
#[command(name = "abylebot", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect the enabled bots and run until Ctrl+C
    Run {
        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,

        /// Config file (defaults to ~/.abylebot/config.json)
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Show configuration status
    Status {
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Validate the configured plugins
    Plugins {
        #[arg(short, long)]
        config: Option<String>,
    },
}

fn config_path(arg: Option<String>) -> Option<PathBuf> {
    arg.map(|p| helpers::expand_tilde(&p))
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { logs, config } => {
            init_logging(logs);
            run::run(config_path(config)).await
        }
        Commands::Status { config } => status::run(config_path(config)),
        Commands::Plugins { config } => {
            init_logging(false);
            plugins_cmd::run(config_path(config))
        }
    }
}

/// Initialize tracing/logging. `RUST_LOG` wins over the defaults.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "abylebot=debug,info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
