// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod addon;
pub mod addon_backup;
pub mod addon_manager;
pub mod docker_addon;
pub mod job_conditions;
pub mod job_manager;
pub mod resolution;

pub use addon::{Addon, AddonContext, AddonPaths, StartupWait};
pub use addon_manager::AddonManager;
pub use job_conditions::ConditionChecker;
pub use job_manager::JobManager;
