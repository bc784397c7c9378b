// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Evaluation Engine
//!
//! Rules that decide whether the system is supported. A rule only runs in
//! the core states it declares; a violated rule adds its reason to the
//! unsupported set, a satisfied one dismisses it again. Both directions are
//! idempotent.
//!
//! After a full battery, any reason in the unhealthy subset (see
//! [`UnsupportedReason::is_unhealthy`]) marks Docker unhealthy. Unlike
//! unsupported reasons that mark is never taken back here.

use super::ResolutionCenter;
use crate::domain::core_state::{CoreState, CoreStateHandle};
use crate::domain::resolution::{ResolutionError, UnhealthyReason, UnsupportedReason};
use crate::infrastructure::telemetry::capture_error;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

#[async_trait]
pub trait Evaluation: Send + Sync {
    fn reason(&self) -> UnsupportedReason;

    /// Log line written when the rule starts failing.
    fn on_failure(&self) -> &'static str;

    /// Core states in which the rule is eligible.
    fn states(&self) -> &'static [CoreState];

    /// True when the rule is currently violated.
    async fn evaluate(&self) -> Result<bool, ResolutionError>;
}

pub struct ResolutionEvaluation {
    center: Arc<ResolutionCenter>,
    core_state: CoreStateHandle,
    evaluations: Vec<Arc<dyn Evaluation>>,
}

impl ResolutionEvaluation {
    pub fn new(center: Arc<ResolutionCenter>, core_state: CoreStateHandle) -> Self {
        Self {
            center,
            core_state,
            evaluations: Vec::new(),
        }
    }

    pub fn register(&mut self, evaluation: Arc<dyn Evaluation>) {
        self.evaluations.push(evaluation);
    }

    pub fn with(mut self, evaluations: impl IntoIterator<Item = Arc<dyn Evaluation>>) -> Self {
        self.evaluations.extend(evaluations);
        self
    }

    pub fn evaluations(&self) -> &[Arc<dyn Evaluation>] {
        &self.evaluations
    }

    /// Runs one rule against the current core state.
    pub async fn run_evaluation(&self, evaluation: &dyn Evaluation) -> Result<(), ResolutionError> {
        let state = self.core_state.get();
        if !evaluation.states().contains(&state) {
            return Ok(());
        }

        let reason = evaluation.reason();
        if evaluation.evaluate().await? {
            if self.center.add_unsupported(reason) {
                warn!(
                    reason = %reason,
                    help = %reason.help_url(),
                    "{}", evaluation.on_failure()
                );
            }
        } else if self.center.dismiss_unsupported(reason) {
            debug!(reason = %reason, "Unsupported reason cleared");
        }
        Ok(())
    }

    /// Runs every registered rule. A failing rule is captured and skipped.
    pub async fn evaluate_system(&self) {
        debug!("Starting system evaluation with state {}", self.core_state.get());

        for evaluation in &self.evaluations {
            if let Err(e) = self.run_evaluation(evaluation.as_ref()).await {
                warn!(reason = %evaluation.reason(), "Evaluation failed: {}", e);
                capture_error("resolution.evaluate", &e);
            }
        }

        if self.center.unsupported().iter().any(|r| r.is_unhealthy()) {
            self.center.add_unhealthy(UnhealthyReason::Docker);
        }

        debug!("System evaluation complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::event_bus::EventBus;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Toggle {
        reason: UnsupportedReason,
        violated: AtomicBool,
        calls: AtomicUsize,
    }

    impl Toggle {
        fn new(reason: UnsupportedReason, violated: bool) -> Arc<Self> {
            Arc::new(Self {
                reason,
                violated: AtomicBool::new(violated),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Evaluation for Toggle {
        fn reason(&self) -> UnsupportedReason {
            self.reason
        }
        fn on_failure(&self) -> &'static str {
            "toggle violated"
        }
        fn states(&self) -> &'static [CoreState] {
            &[CoreState::Setup, CoreState::Running]
        }
        async fn evaluate(&self) -> Result<bool, ResolutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.violated.load(Ordering::SeqCst))
        }
    }

    fn setup(state: CoreState) -> (Arc<ResolutionCenter>, ResolutionEvaluation) {
        let center = Arc::new(ResolutionCenter::new(EventBus::new(16)));
        let engine = ResolutionEvaluation::new(center.clone(), CoreStateHandle::new(state));
        (center, engine)
    }

    #[tokio::test]
    async fn test_skips_ineligible_state() {
        let (center, engine) = setup(CoreState::Initialize);
        let rule = Toggle::new(UnsupportedReason::ContentTrust, true);
        engine.run_evaluation(rule.as_ref()).await.unwrap();
        assert_eq!(rule.calls.load(Ordering::SeqCst), 0);
        assert!(center.is_supported());
    }

    #[tokio::test]
    async fn test_add_then_clear() {
        let (center, engine) = setup(CoreState::Running);
        let rule = Toggle::new(UnsupportedReason::ContentTrust, true);

        engine.run_evaluation(rule.as_ref()).await.unwrap();
        engine.run_evaluation(rule.as_ref()).await.unwrap();
        assert_eq!(center.unsupported(), vec![UnsupportedReason::ContentTrust]);

        rule.violated.store(false, Ordering::SeqCst);
        engine.run_evaluation(rule.as_ref()).await.unwrap();
        assert!(center.is_supported());
    }

    #[tokio::test]
    async fn test_unhealthy_subset_marks_docker() {
        let (center, engine) = setup(CoreState::Running);
        let engine = engine.with([
            Toggle::new(UnsupportedReason::ContentTrust, true) as Arc<dyn Evaluation>,
        ]);
        engine.evaluate_system().await;
        assert!(center.is_healthy());

        let (center, engine) = setup(CoreState::Running);
        let engine = engine.with([Toggle::new(UnsupportedReason::Lxc, true) as Arc<dyn Evaluation>]);
        engine.evaluate_system().await;
        assert_eq!(center.unhealthy(), vec![UnhealthyReason::Docker]);
    }
}
