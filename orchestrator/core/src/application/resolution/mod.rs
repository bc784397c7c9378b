// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Resolution engine: evaluations mark the system unsupported, checks raise
//! issues, fixups remediate them.

pub mod center;
pub mod checks;
pub mod evaluation;
pub mod evaluations;
pub mod fixups;

pub use center::ResolutionCenter;
pub use checks::{Check, ResolutionCheck};
pub use evaluation::{Evaluation, ResolutionEvaluation};
pub use fixups::{Fixup, ResolutionFixup};
