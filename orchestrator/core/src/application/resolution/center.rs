// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Resolution Center
//!
//! Holds every fact the resolution engine has raised:
//! - unsupported reasons (recoverable, dismissed when a rule clears)
//! - unhealthy reasons (only ever added)
//! - issues and the suggestions attached to them
//!
//! Issues and suggestions are deduplicated by `(type, context, reference)`.
//! A suggestion may be attached to several issues; it is dropped once no
//! issue references it anymore.

use crate::domain::events::ResolutionEvent;
use crate::domain::resolution::{
    ContextType, Issue, IssueType, ResolutionError, Suggestion, SuggestionType, UnhealthyReason,
    UnsupportedReason,
};
use crate::infrastructure::event_bus::EventBus;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Default)]
struct ResolutionState {
    unsupported: BTreeSet<UnsupportedReason>,
    unhealthy: BTreeSet<UnhealthyReason>,
    issues: Vec<Issue>,
    suggestions: Vec<Suggestion>,
    /// issue uuid -> suggestion uuids
    links: HashMap<Uuid, Vec<Uuid>>,
}

pub struct ResolutionCenter {
    state: RwLock<ResolutionState>,
    event_bus: EventBus,
}

impl ResolutionCenter {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            state: RwLock::new(ResolutionState::default()),
            event_bus,
        }
    }

    // ------------------------------------------------------------------------
    // Unsupported / unhealthy
    // ------------------------------------------------------------------------

    pub fn unsupported(&self) -> Vec<UnsupportedReason> {
        self.state.read().unsupported.iter().copied().collect()
    }

    pub fn is_supported(&self) -> bool {
        self.state.read().unsupported.is_empty()
    }

    /// Adds `reason`. Returns false if it was already present.
    pub fn add_unsupported(&self, reason: UnsupportedReason) -> bool {
        if !self.state.write().unsupported.insert(reason) {
            return false;
        }
        self.event_bus.publish_resolution_event(ResolutionEvent::UnsupportedAdded {
            reason,
            added_at: Utc::now(),
        });
        true
    }

    /// Removes `reason`. Returns false if it was not present.
    pub fn dismiss_unsupported(&self, reason: UnsupportedReason) -> bool {
        if !self.state.write().unsupported.remove(&reason) {
            return false;
        }
        self.event_bus.publish_resolution_event(ResolutionEvent::UnsupportedDismissed {
            reason,
            dismissed_at: Utc::now(),
        });
        true
    }

    pub fn unhealthy(&self) -> Vec<UnhealthyReason> {
        self.state.read().unhealthy.iter().copied().collect()
    }

    pub fn is_healthy(&self) -> bool {
        self.state.read().unhealthy.is_empty()
    }

    /// Marks the system unhealthy. There is no way back from here short of an
    /// operator clearing it.
    pub fn add_unhealthy(&self, reason: UnhealthyReason) -> bool {
        if !self.state.write().unhealthy.insert(reason) {
            return false;
        }
        warn!("System is unhealthy: {}", reason);
        self.event_bus.publish_resolution_event(ResolutionEvent::UnhealthyAdded {
            reason,
            added_at: Utc::now(),
        });
        true
    }

    // ------------------------------------------------------------------------
    // Issues / suggestions
    // ------------------------------------------------------------------------

    pub fn issues(&self) -> Vec<Issue> {
        self.state.read().issues.clone()
    }

    pub fn suggestions(&self) -> Vec<Suggestion> {
        self.state.read().suggestions.clone()
    }

    pub fn get_issue(&self, uuid: Uuid) -> Option<Issue> {
        self.state.read().issues.iter().find(|i| i.uuid == uuid).cloned()
    }

    pub fn get_suggestion(&self, uuid: Uuid) -> Option<Suggestion> {
        self.state.read().suggestions.iter().find(|s| s.uuid == uuid).cloned()
    }

    pub fn suggestions_for_issue(&self, issue: Uuid) -> Vec<Suggestion> {
        let state = self.state.read();
        let Some(linked) = state.links.get(&issue) else {
            return Vec::new();
        };
        state
            .suggestions
            .iter()
            .filter(|s| linked.contains(&s.uuid))
            .cloned()
            .collect()
    }

    pub fn issues_for_suggestion(&self, suggestion: Uuid) -> Vec<Issue> {
        let state = self.state.read();
        state
            .issues
            .iter()
            .filter(|issue| {
                state
                    .links
                    .get(&issue.uuid)
                    .is_some_and(|linked| linked.contains(&suggestion))
            })
            .cloned()
            .collect()
    }

    /// Issues raised for one add-on.
    pub fn issues_for_reference(&self, context: ContextType, reference: &str) -> Vec<Issue> {
        self.state
            .read()
            .issues
            .iter()
            .filter(|i| i.context == context && i.reference.as_deref() == Some(reference))
            .cloned()
            .collect()
    }

    /// Records `issue` with suggestions of the given types sharing its context
    /// and reference. An equal issue already on record is returned instead.
    pub fn create_issue(
        &self,
        issue_type: IssueType,
        context: ContextType,
        reference: Option<String>,
        suggestions: &[SuggestionType],
    ) -> Issue {
        let suggestions: Vec<Suggestion> = suggestions
            .iter()
            .map(|kind| Suggestion::new(*kind, context, reference.clone()))
            .collect();
        self.add_issue(Issue::new(issue_type, context, reference), suggestions)
    }

    pub fn add_issue(&self, issue: Issue, suggestions: Vec<Suggestion>) -> Issue {
        let (issue, attached, created) = {
            let mut state = self.state.write();

            let (issue, created) = match state.issues.iter().find(|i| i.same_as(&issue)) {
                Some(existing) => (existing.clone(), false),
                None => {
                    state.issues.push(issue.clone());
                    (issue, true)
                }
            };

            let mut attached = Vec::with_capacity(suggestions.len());
            for suggestion in suggestions {
                let suggestion = match state.suggestions.iter().find(|s| s.same_as(&suggestion)) {
                    Some(existing) => existing.clone(),
                    None => {
                        state.suggestions.push(suggestion.clone());
                        suggestion
                    }
                };
                let links = state.links.entry(issue.uuid).or_default();
                if !links.contains(&suggestion.uuid) {
                    links.push(suggestion.uuid);
                }
                attached.push(suggestion);
            }

            (issue, attached, created)
        };

        if created {
            info!(
                issue = ?issue.issue_type,
                context = ?issue.context,
                reference = ?issue.reference,
                "Created resolution issue"
            );
            self.event_bus.publish_resolution_event(ResolutionEvent::IssueCreated {
                issue: issue.clone(),
                suggestions: attached,
                created_at: Utc::now(),
            });
        }
        issue
    }

    /// Removes an issue. Suggestions left without any issue are removed too.
    pub fn dismiss_issue(&self, uuid: Uuid) -> Result<Issue, ResolutionError> {
        let issue = {
            let mut state = self.state.write();
            let position = state
                .issues
                .iter()
                .position(|i| i.uuid == uuid)
                .ok_or(ResolutionError::IssueNotFound(uuid))?;
            let issue = state.issues.remove(position);
            state.links.remove(&uuid);

            let ResolutionState {
                suggestions, links, ..
            } = &mut *state;
            suggestions.retain(|s| links.values().any(|linked| linked.contains(&s.uuid)));
            issue
        };

        info!(issue = ?issue.issue_type, reference = ?issue.reference, "Dismissed resolution issue");
        self.event_bus.publish_resolution_event(ResolutionEvent::IssueDismissed {
            issue: issue.clone(),
            dismissed_at: Utc::now(),
        });
        Ok(issue)
    }

    /// Removes a suggestion from every issue it was attached to.
    pub fn dismiss_suggestion(&self, uuid: Uuid) -> Result<Suggestion, ResolutionError> {
        let mut state = self.state.write();
        let position = state
            .suggestions
            .iter()
            .position(|s| s.uuid == uuid)
            .ok_or(ResolutionError::SuggestionNotFound(uuid))?;
        let suggestion = state.suggestions.remove(position);
        for linked in state.links.values_mut() {
            linked.retain(|s| *s != uuid);
        }
        Ok(suggestion)
    }

    /// Drops every issue raised for `reference`, e.g. after an uninstall.
    pub fn dismiss_reference(&self, context: ContextType, reference: &str) -> usize {
        let issues = self.issues_for_reference(context, reference);
        issues
            .iter()
            .filter(|issue| self.dismiss_issue(issue.uuid).is_ok())
            .count()
    }
}
