// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Supervisor CLI

pub mod addons;
pub mod config;
pub mod jobs;
pub mod resolution;

pub use self::addons::AddonsCommand;
pub use self::config::ConfigCommand;
pub use self::jobs::JobsCommand;
pub use self::resolution::ResolutionCommand;
