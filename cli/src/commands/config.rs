// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use supervisor_core::domain::supervisor_config::SupervisorConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./supervisor.yaml)
        #[arg(short, long, default_value = "./supervisor.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = SupervisorConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. SUPERVISOR_CONFIG_PATH: {}",
            std::env::var("SUPERVISOR_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./supervisor.yaml");
        println!("  4. ~/.supervisor/config.yaml");
        println!("  5. /etc/supervisor/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    println!("{}", "Paths:".bold());
    println!("  Data: {}", spec.paths.data.display());
    println!("  Installed add-ons: {}", spec.paths.addons_file().display());
    println!("  Jobs: {}", spec.paths.jobs_file().display());
    println!("  Add-on data: {}", spec.paths.addon_data().display());
    println!("  Backups: {}", spec.paths.backup().display());
    println!("  Secrets: {}", spec.paths.secrets_file().display());
    println!();

    println!("{}", "Add-ons:".bold());
    println!("  Runtime: {:?}", spec.addons.runtime);
    println!(
        "  Docker socket: {}",
        spec.docker.socket_path.as_deref().unwrap_or("(default)")
    );
    println!("  Architecture: {}", spec.addons.arch);
    println!("  Wait boot: {}s", spec.addons.wait_boot);
    println!("  Repositories: {}", spec.addons.repositories.len());
    for repository in &spec.addons.repositories {
        println!("    - {}", repository.display());
    }
    println!();

    println!("{}", "Resolution:".bold());
    let resolution = &spec.resolution;
    println!(
        "  Intervals: evaluate {}s, check {}s, autofix {}s",
        resolution.evaluation_interval_seconds,
        resolution.check_interval_seconds,
        resolution.autofix_interval_seconds
    );
    println!("  Minimum Docker: {}", resolution.min_docker_version);
    println!("  Minimum free space: {} GB", resolution.min_free_space_gb);
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = SupervisorConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        include_str!("../../templates/config-with-examples.yaml")
    } else {
        include_str!("../../templates/config-minimal.yaml")
    };

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
