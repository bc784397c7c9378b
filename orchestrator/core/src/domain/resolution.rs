// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Resolution Domain
//!
//! Facts raised by the resolution engine. Unsupported reasons are recoverable
//! and re-evaluated continuously; unhealthy reasons only accumulate. Issues
//! carry the suggestions that can remediate them.
//!
//! Issues and suggestions are identified by uuid but deduplicated by
//! `(type, context, reference)`, see [`Issue::same_as`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsupportedReason {
    #[serde(rename = "apparmor")]
    AppArmor,
    CgroupVersion,
    Container,
    ContentTrust,
    DockerConfiguration,
    DockerVersion,
    JobConditions,
    Lxc,
    #[serde(rename = "os")]
    OperatingSystem,
    Privileged,
}

impl UnsupportedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AppArmor => "apparmor",
            Self::CgroupVersion => "cgroup_version",
            Self::Container => "container",
            Self::ContentTrust => "content_trust",
            Self::DockerConfiguration => "docker_configuration",
            Self::DockerVersion => "docker_version",
            Self::JobConditions => "job_conditions",
            Self::Lxc => "lxc",
            Self::OperatingSystem => "os",
            Self::Privileged => "privileged",
        }
    }

    /// Reasons that also mark the whole system unhealthy.
    pub fn is_unhealthy(&self) -> bool {
        matches!(
            self,
            Self::Container | Self::DockerVersion | Self::Lxc | Self::Privileged
        )
    }

    /// Remediation hint shown next to the reason.
    pub fn help_url(&self) -> String {
        format!("https://www.home-assistant.io/more-info/unsupported/{}", self.as_str())
    }
}

impl fmt::Display for UnsupportedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnhealthyReason {
    Docker,
    Privileged,
    Setup,
    Supervisor,
    Untrusted,
}

impl fmt::Display for UnhealthyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Docker => "docker",
            Self::Privileged => "privileged",
            Self::Setup => "setup",
            Self::Supervisor => "supervisor",
            Self::Untrusted => "untrusted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    BootFail,
    CorruptDocker,
    DetachedAddonRemoved,
    FreeSpace,
    MissingContainer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionType {
    ExecuteStart,
    DisableBoot,
    ExecuteRemove,
    ExecuteRepair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    Addon,
    Core,
    Store,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub uuid: Uuid,
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub context: ContextType,
    pub reference: Option<String>,
}

impl Issue {
    pub fn new(issue_type: IssueType, context: ContextType, reference: Option<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            issue_type,
            context,
            reference,
        }
    }

    pub fn addon(issue_type: IssueType, slug: &str) -> Self {
        Self::new(issue_type, ContextType::Addon, Some(slug.to_string()))
    }

    pub fn same_as(&self, other: &Issue) -> bool {
        self.issue_type == other.issue_type && self.context == other.context && self.reference == other.reference
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub uuid: Uuid,
    #[serde(rename = "type")]
    pub suggestion_type: SuggestionType,
    pub context: ContextType,
    pub reference: Option<String>,
}

impl Suggestion {
    pub fn new(suggestion_type: SuggestionType, context: ContextType, reference: Option<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            suggestion_type,
            context,
            reference,
        }
    }

    pub fn same_as(&self, other: &Suggestion) -> bool {
        self.suggestion_type == other.suggestion_type
            && self.context == other.context
            && self.reference == other.reference
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Issue {0} does not exist")]
    IssueNotFound(Uuid),

    #[error("Suggestion {0} does not exist")]
    SuggestionNotFound(Uuid),

    #[error("No fixup handles suggestion {0}")]
    NoFixup(Uuid),

    #[error("Fixup for suggestion {suggestion} failed: {message}")]
    FixupFailed { suggestion: Uuid, message: String },

    /// A rule could not read the state it inspects.
    #[error("Probe failed: {0}")]
    Probe(String),
}

impl From<crate::domain::runtime::RuntimeError> for ResolutionError {
    fn from(err: crate::domain::runtime::RuntimeError) -> Self {
        ResolutionError::Probe(err.to_string())
    }
}

impl From<std::io::Error> for ResolutionError {
    fn from(err: std::io::Error) -> Self {
        ResolutionError::Probe(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_dedup_ignores_uuid() {
        let a = Issue::addon(IssueType::BootFail, "local_ssh");
        let b = Issue::addon(IssueType::BootFail, "local_ssh");
        let c = Issue::addon(IssueType::BootFail, "local_mqtt");
        assert_ne!(a.uuid, b.uuid);
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
    }

    #[test]
    fn test_unhealthy_subset() {
        assert!(UnsupportedReason::Privileged.is_unhealthy());
        assert!(UnsupportedReason::Lxc.is_unhealthy());
        assert!(!UnsupportedReason::AppArmor.is_unhealthy());
        assert_eq!(
            serde_json::to_string(&UnsupportedReason::OperatingSystem).unwrap(),
            "\"os\""
        );
        assert!(UnsupportedReason::DockerVersion.help_url().ends_with("/docker_version"));
    }
}
