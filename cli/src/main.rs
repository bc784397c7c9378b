// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Supervisor CLI
//!
//! The `supervisor` binary runs the add-on Supervisor and manages it.
//!
//! ## Modes
//!
//! - **Daemon**: `supervisor daemon` boots installed add-ons, keeps the
//!   resolution center current and shuts add-ons down on SIGINT/SIGTERM
//! - **Embedded**: every other command builds the services in-process
//!   against the same data directory and exits
//!
//! ## Commands
//!
//! - `supervisor addons list|info|install|uninstall|start|stop|restart|update|rebuild`
//! - `supervisor resolution evaluate|check|info`
//! - `supervisor jobs ignore-conditions [--set ...]`
//! - `supervisor config show|validate|generate`

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use supervisor::commands::{
    self, AddonsCommand, ConfigCommand, JobsCommand, ResolutionCommand,
};
use supervisor::{daemon, embedded};

/// Supervisor - add-on lifecycle manager and system health resolution
#[derive(Parser)]
#[command(name = "supervisor")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "SUPERVISOR_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "SUPERVISOR_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (text, json)
    #[arg(long, global = true, env = "SUPERVISOR_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Supervisor in the foreground
    #[command(name = "daemon")]
    Daemon,

    /// Add-on management
    #[command(name = "addons")]
    Addons {
        #[command(subcommand)]
        command: AddonsCommand,
    },

    /// System evaluations, checks and issues
    #[command(name = "resolution")]
    Resolution {
        #[command(subcommand)]
        command: ResolutionCommand,
    },

    /// Job manager settings
    #[command(name = "jobs")]
    Jobs {
        #[command(subcommand)]
        command: JobsCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if !matches!(cli.command, Commands::Daemon) {
        init_logging(
            cli.log_level.as_deref().unwrap_or("warn"),
            cli.log_format.as_deref().unwrap_or("text"),
        )?;
    }

    match cli.command {
        Commands::Daemon => {
            let config = embedded::load_config(cli.config)?;
            let logging = &config.spec.observability.logging;
            init_logging(
                cli.log_level.as_deref().unwrap_or(&logging.level),
                cli.log_format.as_deref().unwrap_or(&logging.format),
            )?;
            info!("Starting Supervisor in daemon mode");
            daemon::start_daemon(config).await
        }
        Commands::Addons { command } => commands::addons::handle_command(command, cli.config).await,
        Commands::Resolution { command } => {
            commands::resolution::handle_command(command, cli.config).await
        }
        Commands::Jobs { command } => commands::jobs::handle_command(command, cli.config).await,
        Commands::Config { command } => commands::config::handle_command(command, cli.config).await,
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if format == "json" {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}
