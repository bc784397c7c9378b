// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Resolution Checks
//!
//! Checks turn system problems into issues with suggestions attached.
//! `approve_check` re-validates a single issue so stale issues can be
//! dismissed and fixups never act on a problem that went away.

use super::ResolutionCenter;
use crate::application::addon_manager::AddonManager;
use crate::domain::addon::AddonDescriptor;
use crate::domain::core_state::{CoreState, CoreStateHandle};
use crate::domain::host::HostProbe;
use crate::domain::resolution::{ContextType, IssueType, ResolutionError, SuggestionType};
use crate::infrastructure::telemetry::capture_error;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[async_trait]
pub trait Check: Send + Sync {
    fn issue(&self) -> IssueType;

    fn context(&self) -> ContextType;

    fn states(&self) -> &'static [CoreState];

    /// Raises issues for every occurrence of the problem.
    async fn run_check(&self, center: &ResolutionCenter) -> Result<(), ResolutionError>;

    /// True while the problem behind an issue with `reference` still exists.
    async fn approve_check(&self, reference: Option<&str>) -> Result<bool, ResolutionError>;
}

pub struct ResolutionCheck {
    center: Arc<ResolutionCenter>,
    core_state: CoreStateHandle,
    checks: Vec<Arc<dyn Check>>,
}

impl ResolutionCheck {
    pub fn new(center: Arc<ResolutionCenter>, core_state: CoreStateHandle) -> Self {
        Self {
            center,
            core_state,
            checks: Vec::new(),
        }
    }

    pub fn register(&mut self, check: Arc<dyn Check>) {
        self.checks.push(check);
    }

    pub fn with(mut self, checks: impl IntoIterator<Item = Arc<dyn Check>>) -> Self {
        self.checks.extend(checks);
        self
    }

    /// The check responsible for issues of `issue` in `context`.
    pub fn get(&self, issue: IssueType, context: ContextType) -> Option<Arc<dyn Check>> {
        self.checks
            .iter()
            .find(|c| c.issue() == issue && c.context() == context)
            .cloned()
    }

    /// Dismisses issues that no longer apply, then runs every eligible check.
    pub async fn check_system(&self) {
        let state = self.core_state.get();
        debug!("Starting system checks with state {}", state);

        for check in &self.checks {
            if !check.states().contains(&state) {
                continue;
            }
            if let Err(e) = self.run(check.as_ref()).await {
                warn!(issue = ?check.issue(), "Check failed: {}", e);
                capture_error("resolution.check", &e);
            }
        }

        debug!("System checks complete");
    }

    async fn run(&self, check: &dyn Check) -> Result<(), ResolutionError> {
        let stale: Vec<_> = self
            .center
            .issues()
            .into_iter()
            .filter(|i| i.issue_type == check.issue() && i.context == check.context())
            .collect();
        for issue in stale {
            if !check.approve_check(issue.reference.as_deref()).await? {
                info!(issue = ?issue.issue_type, reference = ?issue.reference, "Issue resolved itself");
                self.center.dismiss_issue(issue.uuid)?;
            }
        }
        check.run_check(&self.center).await
    }
}

// ============================================================================
// System
// ============================================================================

pub struct FreeSpaceCheck {
    host: Arc<dyn HostProbe>,
    data_path: PathBuf,
    min_free_space: u64,
}

impl FreeSpaceCheck {
    pub fn new(host: Arc<dyn HostProbe>, data_path: PathBuf, min_free_space: u64) -> Self {
        Self {
            host,
            data_path,
            min_free_space,
        }
    }

    async fn low(&self) -> Result<bool, ResolutionError> {
        Ok(self.host.free_space(&self.data_path).await? < self.min_free_space)
    }
}

#[async_trait]
impl Check for FreeSpaceCheck {
    fn issue(&self) -> IssueType {
        IssueType::FreeSpace
    }
    fn context(&self) -> ContextType {
        ContextType::System
    }
    fn states(&self) -> &'static [CoreState] {
        &[CoreState::Running, CoreState::Startup]
    }

    async fn run_check(&self, center: &ResolutionCenter) -> Result<(), ResolutionError> {
        if self.low().await? {
            center.create_issue(IssueType::FreeSpace, ContextType::System, None, &[]);
        }
        Ok(())
    }

    async fn approve_check(&self, _reference: Option<&str>) -> Result<bool, ResolutionError> {
        self.low().await
    }
}

// ============================================================================
// Add-ons
// ============================================================================

/// Installed add-ons whose repository dropped them.
pub struct DetachedAddonCheck {
    addons: Arc<AddonManager>,
}

impl DetachedAddonCheck {
    pub fn new(addons: Arc<AddonManager>) -> Self {
        Self { addons }
    }

    fn detached(&self, slug: &str) -> bool {
        self.addons.get_local(slug).is_some() && !self.addons.store().contains(slug)
    }
}

#[async_trait]
impl Check for DetachedAddonCheck {
    fn issue(&self) -> IssueType {
        IssueType::DetachedAddonRemoved
    }
    fn context(&self) -> ContextType {
        ContextType::Addon
    }
    fn states(&self) -> &'static [CoreState] {
        &[CoreState::Setup, CoreState::Running]
    }

    async fn run_check(&self, center: &ResolutionCenter) -> Result<(), ResolutionError> {
        for addon in self.addons.installed() {
            if self.detached(addon.slug()) {
                center.create_issue(
                    IssueType::DetachedAddonRemoved,
                    ContextType::Addon,
                    Some(addon.slug().to_string()),
                    &[SuggestionType::ExecuteRemove],
                );
            }
        }
        Ok(())
    }

    async fn approve_check(&self, reference: Option<&str>) -> Result<bool, ResolutionError> {
        Ok(reference.is_some_and(|slug| self.detached(slug)))
    }
}

/// Installed add-ons whose image is gone from Docker.
pub struct MissingContainerCheck {
    addons: Arc<AddonManager>,
}

impl MissingContainerCheck {
    pub fn new(addons: Arc<AddonManager>) -> Self {
        Self { addons }
    }
}

#[async_trait]
impl Check for MissingContainerCheck {
    fn issue(&self) -> IssueType {
        IssueType::MissingContainer
    }
    fn context(&self) -> ContextType {
        ContextType::Addon
    }
    fn states(&self) -> &'static [CoreState] {
        &[CoreState::Running]
    }

    async fn run_check(&self, center: &ResolutionCenter) -> Result<(), ResolutionError> {
        for addon in self.addons.installed() {
            let exists = match addon.exists().await {
                Ok(exists) => exists,
                Err(e) => {
                    warn!("Can't check image of add-on {}: {}", addon.slug(), e);
                    continue;
                }
            };
            if !exists {
                center.create_issue(
                    IssueType::MissingContainer,
                    ContextType::Addon,
                    Some(addon.slug().to_string()),
                    &[SuggestionType::ExecuteRepair],
                );
            }
        }
        Ok(())
    }

    async fn approve_check(&self, reference: Option<&str>) -> Result<bool, ResolutionError> {
        let Some(addon) = reference.and_then(|slug| self.addons.get_local(slug)) else {
            return Ok(false);
        };
        Ok(!addon.exists().await?)
    }
}

/// Every built-in check.
pub fn default_checks(
    addons: Arc<AddonManager>,
    host: Arc<dyn HostProbe>,
    data_path: PathBuf,
    min_free_space: u64,
) -> Vec<Arc<dyn Check>> {
    vec![
        Arc::new(FreeSpaceCheck::new(host, data_path, min_free_space)),
        Arc::new(DetachedAddonCheck::new(addons.clone())),
        Arc::new(MissingContainerCheck::new(addons)),
    ]
}
