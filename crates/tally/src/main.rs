// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tally - cost-source plugin registry.
//!
//! This is the binary entry point: the `serve` daemon and one-shot
//! commands for every registry operation.

mod commands;
mod serve;
mod shutdown;
mod status;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tally_config::TallyConfig;
use tally_core::TrustLevel;

/// Tally - cost-source plugin registry.
#[derive(Parser, Debug)]
#[command(name = "tally", version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to the standard search path).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print machine-readable JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    plain: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the registry daemon and its HTTP gateway.
    Serve,
    /// Query a running daemon's health endpoint.
    Status,
    /// Scan every configured discovery source.
    Discover {
        /// Ignore the cached index.
        #[arg(long)]
        refresh: bool,
    },
    /// Search discovered plugins by name, description, provider or capability.
    Search {
        #[arg(default_value = "")]
        query: String,
        /// Only plugins supporting this cloud provider.
        #[arg(long)]
        provider: Option<String>,
    },
    /// Show a plugin manifest.
    Show {
        name: String,
        /// Exact version (defaults to the latest).
        #[arg(long)]
        version: Option<String>,
    },
    /// Validate a manifest file without installing it.
    Validate { path: PathBuf },
    /// Install a plugin and its dependencies.
    Install {
        name: String,
        /// Version constraint, e.g. `^2.1`.
        #[arg(long)]
        version: Option<String>,
        #[command(flatten)]
        confirm: ConfirmArgs,
    },
    /// Update an installed plugin.
    Update {
        name: String,
        /// Exact target version (defaults to the newest discovered).
        #[arg(long)]
        version: Option<String>,
        /// Accept a minor update.
        #[arg(long)]
        acknowledge: bool,
        /// Accept a major update.
        #[arg(long)]
        force: bool,
        #[command(flatten)]
        confirm: ConfirmArgs,
    },
    /// Remove an installed plugin.
    Remove {
        name: String,
        /// Also remove plugins that depend on it.
        #[arg(long)]
        cascade: bool,
    },
    /// List installed plugins.
    List,
    /// Run health checks for one plugin, or all of them.
    Health { name: Option<String> },
}

/// Flags shared by install and update.
#[derive(Args, Debug, Clone, Copy)]
struct ConfirmArgs {
    /// Proceed despite validation warnings.
    #[arg(long, short = 'y')]
    yes: bool,
    /// Accept a lower trust level for this installation only.
    #[arg(long, value_name = "LEVEL")]
    trust_override: Option<TrustLevel>,
}

fn load_config(path: Option<&PathBuf>) -> Option<TallyConfig> {
    let loaded = match path {
        Some(path) => tally_config::load_and_validate_path(path),
        None => tally_config::load_and_validate(),
    };
    match loaded {
        Ok(config) => Some(config),
        Err(errors) => {
            tally_config::render_errors(&errors);
            None
        }
    }
}

/// Initializes the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tally={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let Some(config) = load_config(cli.config.as_ref()) else {
        return ExitCode::from(2);
    };
    init_tracing(&config.registry.log_level);

    let output = commands::Output::new(cli.json, cli.plain);
    let result = match cli.command {
        Commands::Serve => serve::run_serve(config).await,
        Commands::Status => status::run_status(&config, output).await,
        command => commands::run(&config, command, output).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output.error(&e);
            ExitCode::FAILURE
        }
    }
}
