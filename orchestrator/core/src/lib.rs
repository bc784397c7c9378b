// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Supervisor Core
//!
//! Add-on lifecycle management, job locking and the resolution engine of the
//! Supervisor daemon.
//!
//! # Architecture
//!
//! - **domain:** value objects, state enums, ports and errors
//! - **application:** installed add-ons, the add-on manager, jobs and resolution
//! - **infrastructure:** Docker, JSON stores, event bus, host probes

pub mod application;
pub mod domain;
pub mod infrastructure;
