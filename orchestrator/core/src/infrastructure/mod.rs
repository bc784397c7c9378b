// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod addons_data;
pub mod event_bus;
pub mod host;
pub mod hosts_file;
pub mod json_file;
pub mod memory_runtime;
pub mod runtime;
pub mod secrets;
pub mod store_loader;
pub mod telemetry;

pub use event_bus::{DomainEvent, EventBus};
pub use telemetry::capture_error;
