// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Supervisor Lifecycle Phase
//!
//! `CoreState` is the Supervisor process's own lifecycle phase. Evaluations,
//! checks and job conditions declare the phases in which they are eligible.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoreState {
    Initialize,
    Setup,
    Startup,
    Running,
    Freeze,
    Shutdown,
    Stopping,
    Close,
}

impl fmt::Display for CoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initialize => "initialize",
            Self::Setup => "setup",
            Self::Startup => "startup",
            Self::Running => "running",
            Self::Freeze => "freeze",
            Self::Shutdown => "shutdown",
            Self::Stopping => "stopping",
            Self::Close => "close",
        };
        f.write_str(name)
    }
}

/// Shared handle to the current [`CoreState`].
///
/// Cloning the handle shares the underlying channel, so every component sees
/// the same phase.
#[derive(Clone)]
pub struct CoreStateHandle {
    sender: Arc<watch::Sender<CoreState>>,
}

impl CoreStateHandle {
    pub fn new(initial: CoreState) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn get(&self) -> CoreState {
        *self.sender.borrow()
    }

    pub fn set(&self, state: CoreState) {
        let previous = self.sender.send_replace(state);
        if previous != state {
            info!("Supervisor state changed: {} -> {}", previous, state);
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<CoreState> {
        self.sender.subscribe()
    }
}

impl Default for CoreStateHandle {
    fn default() -> Self {
        Self::new(CoreState::Initialize)
    }
}
