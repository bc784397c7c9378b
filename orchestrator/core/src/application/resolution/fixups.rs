// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Resolution Fixups
//!
//! A fixup executes one suggestion type. Before it runs, the issues the
//! suggestion belongs to are re-validated through their checks; when none
//! of them still applies the suggestion is dismissed without running.

use super::checks::ResolutionCheck;
use super::ResolutionCenter;
use crate::application::addon_manager::AddonManager;
use crate::domain::addon::{AddonBoot, AddonError};
use crate::domain::resolution::{ContextType, IssueType, ResolutionError, SuggestionType};
use crate::infrastructure::telemetry::capture_error;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[async_trait]
pub trait Fixup: Send + Sync {
    fn suggestion(&self) -> SuggestionType;

    fn context(&self) -> ContextType;

    /// Issue types this fixup remediates.
    fn issues(&self) -> &'static [IssueType];

    /// Applied by `run_autofix` without operator confirmation.
    fn auto(&self) -> bool {
        false
    }

    async fn process_fixup(&self, reference: Option<&str>) -> Result<(), AddonError>;
}

pub struct ResolutionFixup {
    center: Arc<ResolutionCenter>,
    checks: Arc<ResolutionCheck>,
    fixups: Vec<Arc<dyn Fixup>>,
}

impl ResolutionFixup {
    pub fn new(center: Arc<ResolutionCenter>, checks: Arc<ResolutionCheck>) -> Self {
        Self {
            center,
            checks,
            fixups: Vec::new(),
        }
    }

    pub fn register(&mut self, fixup: Arc<dyn Fixup>) {
        self.fixups.push(fixup);
    }

    pub fn with(mut self, fixups: impl IntoIterator<Item = Arc<dyn Fixup>>) -> Self {
        self.fixups.extend(fixups);
        self
    }

    fn get(&self, suggestion: SuggestionType, context: ContextType) -> Option<&Arc<dyn Fixup>> {
        self.fixups
            .iter()
            .find(|f| f.suggestion() == suggestion && f.context() == context)
    }

    /// Runs the fixup behind a suggestion. On success the suggestion and the
    /// issues it was attached to are dismissed.
    pub async fn apply_suggestion(&self, uuid: Uuid) -> Result<(), ResolutionError> {
        let suggestion = self
            .center
            .get_suggestion(uuid)
            .ok_or(ResolutionError::SuggestionNotFound(uuid))?;
        let fixup = self
            .get(suggestion.suggestion_type, suggestion.context)
            .ok_or(ResolutionError::NoFixup(uuid))?;

        let mut issues = Vec::new();
        for issue in self.center.issues_for_suggestion(uuid) {
            let valid = match self.checks.get(issue.issue_type, issue.context) {
                Some(check) => check.approve_check(issue.reference.as_deref()).await?,
                None => true,
            };
            if valid {
                issues.push(issue);
            } else {
                info!(issue = ?issue.issue_type, reference = ?issue.reference, "Issue no longer applies");
                self.center.dismiss_issue(issue.uuid)?;
            }
        }
        if issues.is_empty() {
            // Dismissing the last issue already dropped the suggestion.
            let _ = self.center.dismiss_suggestion(uuid);
            return Ok(());
        }

        fixup
            .process_fixup(suggestion.reference.as_deref())
            .await
            .map_err(|e| ResolutionError::FixupFailed {
                suggestion: uuid,
                message: e.to_string(),
            })?;

        info!(suggestion = ?suggestion.suggestion_type, reference = ?suggestion.reference, "Fixup applied");
        let _ = self.center.dismiss_suggestion(uuid);
        for issue in issues {
            let _ = self.center.dismiss_issue(issue.uuid);
        }
        Ok(())
    }

    /// Applies every pending suggestion whose fixup runs automatically.
    pub async fn run_autofix(&self) {
        for suggestion in self.center.suggestions() {
            let auto = self
                .get(suggestion.suggestion_type, suggestion.context)
                .is_some_and(|f| f.auto());
            if !auto {
                continue;
            }
            if let Err(e) = self.apply_suggestion(suggestion.uuid).await {
                warn!(suggestion = ?suggestion.suggestion_type, "Autofix failed: {}", e);
                capture_error("resolution.fixup", &e);
            }
        }
    }
}

fn addon_reference(reference: Option<&str>) -> Result<&str, AddonError> {
    reference.ok_or_else(|| AddonError::Invalid("Fixup requires an add-on reference".to_string()))
}

// ============================================================================
// Add-on fixups
// ============================================================================

pub struct ExecuteStartFixup {
    addons: Arc<AddonManager>,
}

#[async_trait]
impl Fixup for ExecuteStartFixup {
    fn suggestion(&self) -> SuggestionType {
        SuggestionType::ExecuteStart
    }
    fn context(&self) -> ContextType {
        ContextType::Addon
    }
    fn issues(&self) -> &'static [IssueType] {
        &[IssueType::BootFail]
    }

    async fn process_fixup(&self, reference: Option<&str>) -> Result<(), AddonError> {
        let slug = addon_reference(reference)?;
        self.addons.start(slug).await?.await
    }
}

pub struct DisableBootFixup {
    addons: Arc<AddonManager>,
}

#[async_trait]
impl Fixup for DisableBootFixup {
    fn suggestion(&self) -> SuggestionType {
        SuggestionType::DisableBoot
    }
    fn context(&self) -> ContextType {
        ContextType::Addon
    }
    fn issues(&self) -> &'static [IssueType] {
        &[IssueType::BootFail]
    }

    async fn process_fixup(&self, reference: Option<&str>) -> Result<(), AddonError> {
        let slug = addon_reference(reference)?;
        let addon = self
            .addons
            .get_local(slug)
            .ok_or_else(|| AddonError::NotInstalled(slug.to_string()))?;
        addon.set_boot(AddonBoot::Manual)
    }
}

pub struct ExecuteRemoveFixup {
    addons: Arc<AddonManager>,
}

#[async_trait]
impl Fixup for ExecuteRemoveFixup {
    fn suggestion(&self) -> SuggestionType {
        SuggestionType::ExecuteRemove
    }
    fn context(&self) -> ContextType {
        ContextType::Addon
    }
    fn issues(&self) -> &'static [IssueType] {
        &[IssueType::DetachedAddonRemoved]
    }

    async fn process_fixup(&self, reference: Option<&str>) -> Result<(), AddonError> {
        self.addons.uninstall(addon_reference(reference)?, false).await
    }
}

pub struct ExecuteRepairFixup {
    addons: Arc<AddonManager>,
}

#[async_trait]
impl Fixup for ExecuteRepairFixup {
    fn suggestion(&self) -> SuggestionType {
        SuggestionType::ExecuteRepair
    }
    fn context(&self) -> ContextType {
        ContextType::Addon
    }
    fn issues(&self) -> &'static [IssueType] {
        &[IssueType::MissingContainer]
    }
    fn auto(&self) -> bool {
        true
    }

    async fn process_fixup(&self, reference: Option<&str>) -> Result<(), AddonError> {
        self.addons.repair_addon(addon_reference(reference)?).await
    }
}

/// Every built-in fixup.
pub fn default_fixups(addons: Arc<AddonManager>) -> Vec<Arc<dyn Fixup>> {
    vec![
        Arc::new(ExecuteStartFixup {
            addons: addons.clone(),
        }),
        Arc::new(DisableBootFixup {
            addons: addons.clone(),
        }),
        Arc::new(ExecuteRemoveFixup {
            addons: addons.clone(),
        }),
        Arc::new(ExecuteRepairFixup { addons }),
    ]
}
