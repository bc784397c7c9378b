// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: value objects, state enums, errors and the ports the
//! application layer drives (container runtime, host probe, persistence, DNS).

pub mod addon;
pub mod core_state;
pub mod discovery;
pub mod dns;
pub mod events;
pub mod host;
pub mod job;
pub mod job_group;
pub mod repository;
pub mod resolution;
pub mod runtime;
pub mod supervisor_config;
