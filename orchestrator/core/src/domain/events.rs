// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::addon::AddonState;
use crate::domain::resolution::{Issue, Suggestion, UnhealthyReason, UnsupportedReason};

/// Message type Home Assistant listens on for Supervisor notifications.
pub const SUPERVISOR_EVENT: &str = "supervisor/event";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AddonEvent {
    StateChanged {
        slug: String,
        state: AddonState,
        changed_at: DateTime<Utc>,
    },
    Installed {
        slug: String,
        version: String,
        installed_at: DateTime<Utc>,
    },
    Updated {
        slug: String,
        old_version: String,
        new_version: String,
        updated_at: DateTime<Utc>,
    },
    Uninstalled {
        slug: String,
        removed_at: DateTime<Utc>,
    },
}

impl AddonEvent {
    pub fn slug(&self) -> &str {
        match self {
            AddonEvent::StateChanged { slug, .. }
            | AddonEvent::Installed { slug, .. }
            | AddonEvent::Updated { slug, .. }
            | AddonEvent::Uninstalled { slug, .. } => slug,
        }
    }

    /// Websocket payload for Home Assistant. Only state changes are forwarded.
    pub fn to_home_assistant(&self) -> Option<serde_json::Value> {
        match self {
            AddonEvent::StateChanged { slug, state, .. } => Some(json!({
                "type": SUPERVISOR_EVENT,
                "data": {
                    "event": "addon",
                    "slug": slug,
                    "state": state,
                },
            })),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResolutionEvent {
    IssueCreated {
        issue: Issue,
        suggestions: Vec<Suggestion>,
        created_at: DateTime<Utc>,
    },
    IssueDismissed {
        issue: Issue,
        dismissed_at: DateTime<Utc>,
    },
    UnsupportedAdded {
        reason: UnsupportedReason,
        added_at: DateTime<Utc>,
    },
    UnsupportedDismissed {
        reason: UnsupportedReason,
        dismissed_at: DateTime<Utc>,
    },
    UnhealthyAdded {
        reason: UnhealthyReason,
        added_at: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_change_wire_format() {
        let event = AddonEvent::StateChanged {
            slug: "local_ssh".to_string(),
            state: AddonState::Started,
            changed_at: Utc::now(),
        };
        let message = event.to_home_assistant().unwrap();
        assert_eq!(message["type"], "supervisor/event");
        assert_eq!(message["data"]["event"], "addon");
        assert_eq!(message["data"]["slug"], "local_ssh");
        assert_eq!(message["data"]["state"], "started");
    }

    #[test]
    fn test_lifecycle_events_are_not_forwarded() {
        let event = AddonEvent::Uninstalled {
            slug: "local_ssh".to_string(),
            removed_at: Utc::now(),
        };
        assert_eq!(event.slug(), "local_ssh");
        assert!(event.to_home_assistant().is_none());
    }

    #[test]
    fn test_resolution_event_serialization() {
        let event = ResolutionEvent::UnsupportedAdded {
            reason: UnsupportedReason::Privileged,
            added_at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("UnsupportedAdded"));
        assert!(json.contains("privileged"));
    }
}
