// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Add-on management commands
//!
//! Commands: list, info, install, uninstall, start, stop, restart, update, rebuild

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

use supervisor_core::application::addon::StartupWait;
use supervisor_core::domain::addon::AddonDescriptor;

use crate::embedded::EmbeddedSupervisor;

#[derive(Subcommand)]
pub enum AddonsCommand {
    /// List store and installed add-ons
    List {
        /// Only installed add-ons
        #[arg(long)]
        installed: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show details of one add-on
    Info {
        slug: String,
    },

    /// Install an add-on from the store
    Install {
        slug: String,
    },

    /// Remove an installed add-on
    Uninstall {
        slug: String,

        /// Also delete the add-on's public configuration directory
        #[arg(long)]
        remove_config: bool,
    },

    /// Start an add-on and wait until it is up
    Start {
        slug: String,
    },

    Stop {
        slug: String,
    },

    Restart {
        slug: String,
    },

    /// Update an add-on to the store version
    Update {
        slug: String,

        /// Write a partial backup before updating
        #[arg(long)]
        backup: bool,
    },

    /// Rebuild a locally built add-on
    Rebuild {
        slug: String,
    },
}

#[derive(Serialize)]
struct AddonRow {
    slug: String,
    name: String,
    version: String,
    latest_version: String,
    installed: bool,
    state: Option<String>,
    boot: Option<String>,
}

pub async fn handle_command(command: AddonsCommand, config_path: Option<PathBuf>) -> Result<()> {
    let supervisor = EmbeddedSupervisor::attach(config_path).await?;
    let manager = &supervisor.manager;

    match command {
        AddonsCommand::List { installed, json } => list(&supervisor, installed, json),
        AddonsCommand::Info { slug } => info(&supervisor, &slug),
        AddonsCommand::Install { slug } => {
            manager
                .install(&slug)
                .await
                .with_context(|| format!("Failed to install {}", slug))?;
            done(format!("Installed {}", slug));
            Ok(())
        }
        AddonsCommand::Uninstall { slug, remove_config } => {
            manager
                .uninstall(&slug, remove_config)
                .await
                .with_context(|| format!("Failed to uninstall {}", slug))?;
            done(format!("Uninstalled {}", slug));
            Ok(())
        }
        AddonsCommand::Start { slug } => {
            let wait = manager
                .start(&slug)
                .await
                .with_context(|| format!("Failed to start {}", slug))?;
            wait_started(&slug, Some(wait)).await
        }
        AddonsCommand::Stop { slug } => {
            manager
                .stop(&slug)
                .await
                .with_context(|| format!("Failed to stop {}", slug))?;
            done(format!("Stopped {}", slug));
            Ok(())
        }
        AddonsCommand::Restart { slug } => {
            let wait = manager
                .restart(&slug)
                .await
                .with_context(|| format!("Failed to restart {}", slug))?;
            wait_started(&slug, Some(wait)).await
        }
        AddonsCommand::Update { slug, backup } => {
            let wait = manager
                .update(&slug, backup)
                .await
                .with_context(|| format!("Failed to update {}", slug))?;
            done(format!("Updated {}", slug));
            wait_started(&slug, wait).await
        }
        AddonsCommand::Rebuild { slug } => {
            let wait = manager
                .rebuild(&slug)
                .await
                .with_context(|| format!("Failed to rebuild {}", slug))?;
            done(format!("Rebuilt {}", slug));
            wait_started(&slug, wait).await
        }
    }
}

fn list(supervisor: &EmbeddedSupervisor, installed_only: bool, json: bool) -> Result<()> {
    let rows: Vec<AddonRow> = supervisor
        .manager
        .all()
        .into_iter()
        .filter(|addon| !installed_only || addon.is_installed())
        .map(|addon| row(supervisor, addon.as_ref()))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("{}", "No add-ons found".dimmed());
        return Ok(());
    }

    println!(
        "{:<28} {:<12} {:<12} {:<10} {}",
        "SLUG".bold(),
        "VERSION".bold(),
        "LATEST".bold(),
        "STATE".bold(),
        "NAME".bold()
    );
    for row in rows {
        let state = row.state.unwrap_or_else(|| "-".to_string());
        let version = if row.installed { row.version } else { "-".to_string() };
        let latest = if row.latest_version != version && row.installed {
            row.latest_version.yellow().to_string()
        } else {
            row.latest_version
        };
        println!(
            "{:<28} {:<12} {:<12} {:<10} {}",
            row.slug, version, latest, state, row.name
        );
    }
    Ok(())
}

fn info(supervisor: &EmbeddedSupervisor, slug: &str) -> Result<()> {
    let addon = supervisor
        .manager
        .get(slug, false)
        .with_context(|| format!("Add-on {} does not exist", slug))?;
    let row = row(supervisor, addon.as_ref());
    let config = addon.config();

    println!("{}", row.name.bold());
    println!("  Slug: {}", row.slug);
    if !config.description.is_empty() {
        println!("  Description: {}", config.description);
    }
    println!("  Installed: {}", row.installed);
    println!("  Version: {}", row.version);
    println!("  Latest: {}", row.latest_version);
    if let Some(state) = row.state {
        println!("  State: {}", state);
    }
    if let Some(boot) = row.boot {
        println!("  Boot: {}", boot);
    }
    println!("  Startup: {}", config.startup);
    println!(
        "  Image: {}",
        config.image.as_deref().unwrap_or("(built locally)")
    );
    println!(
        "  Available on this system: {}",
        addon.is_available(
            &supervisor.config.spec.addons.arch,
            supervisor.config.spec.addons.machine.as_deref()
        )
    );

    let issues = supervisor
        .resolution
        .issues()
        .into_iter()
        .filter(|i| i.reference.as_deref() == Some(slug))
        .collect::<Vec<_>>();
    if !issues.is_empty() {
        println!("  {}", "Issues:".yellow());
        for issue in issues {
            println!("    - {}", label(&issue.issue_type));
        }
    }
    Ok(())
}

fn row(supervisor: &EmbeddedSupervisor, addon: &dyn AddonDescriptor) -> AddonRow {
    let local = supervisor.manager.get_local(addon.slug());
    AddonRow {
        slug: addon.slug().to_string(),
        name: addon.name(),
        version: addon.version(),
        latest_version: supervisor
            .manager
            .store()
            .get(addon.slug())
            .map(|store| store.version())
            .unwrap_or_else(|| addon.latest_version()),
        installed: addon.is_installed(),
        state: local.as_ref().map(|a| label(&a.state())),
        boot: local.as_ref().map(|a| label(&a.boot())),
    }
}

/// Lower-case wire name of a serde enum.
pub(crate) fn label<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_default()
}

async fn wait_started(slug: &str, wait: Option<StartupWait>) -> Result<()> {
    if let Some(wait) = wait {
        wait.await
            .with_context(|| format!("{} did not come up", slug))?;
        done(format!("{} is running", slug));
    }
    Ok(())
}

fn done(message: String) {
    println!("{}", format!("✓ {}", message).green());
}
