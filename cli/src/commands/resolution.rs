// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Resolution center commands
//!
//! Commands: evaluate, check, info

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use supervisor_core::domain::core_state::CoreState;

use super::addons::label;
use crate::embedded::EmbeddedSupervisor;

#[derive(Subcommand)]
pub enum ResolutionCommand {
    /// Run every system evaluation
    Evaluate,

    /// Run system checks and report the issues found
    Check {
        /// Apply fixups marked as automatic afterwards
        #[arg(long)]
        autofix: bool,
    },

    /// Evaluate, check and print the resolution center
    Info,
}

pub async fn handle_command(command: ResolutionCommand, config_path: Option<PathBuf>) -> Result<()> {
    let supervisor = EmbeddedSupervisor::attach(config_path).await?;

    match command {
        ResolutionCommand::Evaluate => {
            evaluate(&supervisor).await;
            print_support(&supervisor);
        }
        ResolutionCommand::Check { autofix } => {
            supervisor.checks.check_system().await;
            if autofix {
                supervisor.fixups.run_autofix().await;
            }
            print_issues(&supervisor);
        }
        ResolutionCommand::Info => {
            evaluate(&supervisor).await;
            supervisor.checks.check_system().await;
            print_support(&supervisor);
            println!();
            print_issues(&supervisor);
        }
    }
    Ok(())
}

/// Runs the evaluations the way boot does, one pass per eligible phase.
async fn evaluate(supervisor: &EmbeddedSupervisor) {
    for state in [CoreState::Initialize, CoreState::Setup, CoreState::Running] {
        supervisor.core_state.set(state);
        supervisor.evaluation.evaluate_system().await;
    }
}

fn print_support(supervisor: &EmbeddedSupervisor) {
    let resolution = &supervisor.resolution;

    if resolution.is_supported() {
        println!("{}", "✓ System is supported".green());
    } else {
        println!("{}", "System is unsupported:".yellow().bold());
        for reason in resolution.unsupported() {
            println!("  - {} ({})", reason, reason.help_url().dimmed());
        }
    }

    if resolution.is_healthy() {
        println!("{}", "✓ System is healthy".green());
    } else {
        println!("{}", "System is unhealthy:".red().bold());
        for reason in resolution.unhealthy() {
            println!("  - {}", reason);
        }
    }
}

fn print_issues(supervisor: &EmbeddedSupervisor) {
    let resolution = &supervisor.resolution;
    let issues = resolution.issues();

    if issues.is_empty() {
        println!("{}", "✓ No issues found".green());
        return;
    }

    println!("{}", "Issues:".bold());
    for issue in issues {
        println!(
            "  {} {} [{}]",
            label(&issue.issue_type).yellow(),
            issue.reference.as_deref().unwrap_or(""),
            label(&issue.context)
        );
        for suggestion in resolution.suggestions_for_issue(issue.uuid) {
            println!(
                "    suggestion {} {}",
                label(&suggestion.suggestion_type),
                suggestion.uuid.to_string().dimmed()
            );
        }
    }
}
