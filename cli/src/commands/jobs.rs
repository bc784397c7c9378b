// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Job manager commands
//!
//! Commands: ignore-conditions

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use supervisor_core::application::job_manager::JobManager;
use supervisor_core::domain::job::JobCondition;

use crate::embedded::load_config;

#[derive(Subcommand)]
pub enum JobsCommand {
    /// Show or replace the job conditions that are skipped
    IgnoreConditions {
        /// Conditions to ignore (free_space, healthy, internet_host, running, supported)
        #[arg(long, value_delimiter = ',', value_parser = parse_condition, num_args = 0..)]
        set: Option<Vec<JobCondition>>,
    },
}

pub async fn handle_command(command: JobsCommand, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let jobs_file = config.spec.paths.jobs_file();
    let jobs = JobManager::load(&jobs_file)
        .with_context(|| format!("Failed to load {:?}", jobs_file))?;

    match command {
        JobsCommand::IgnoreConditions { set } => {
            if let Some(conditions) = set {
                jobs.set_ignore_conditions(conditions)
                    .with_context(|| format!("Failed to write {:?}", jobs_file))?;
                println!("{}", "✓ Ignored job conditions updated".green());
            }

            let ignored = jobs.ignore_conditions();
            if ignored.is_empty() {
                println!("{}", "No job conditions are ignored".dimmed());
            } else {
                println!("{}", "Ignored job conditions:".bold());
                for condition in ignored {
                    println!("  - {}", condition);
                }
            }
        }
    }
    Ok(())
}

fn parse_condition(value: &str) -> Result<JobCondition, String> {
    serde_json::from_value(serde_json::Value::String(value.trim().to_string()))
        .map_err(|_| format!("unknown job condition '{}'", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_condition() {
        assert_eq!(parse_condition("free_space"), Ok(JobCondition::FreeSpace));
        assert_eq!(parse_condition(" healthy"), Ok(JobCondition::Healthy));
        assert!(parse_condition("FreeSpace").is_err());
    }
}
