// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Error capture for failures nobody is waiting on (boot, shutdown, periodic
//! resolution runs). Captured errors are logged with their source chain and
//! counted in `supervisor_captured_errors_total{component}`.

use std::error::Error;
use tracing::error;

pub const CAPTURED_ERRORS: &str = "supervisor_captured_errors_total";

pub fn capture_error(component: &'static str, err: &(dyn Error + 'static)) {
    let mut chain = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }

    error!(
        component,
        error = %err,
        caused_by = ?chain,
        "Captured unexpected error"
    );
    metrics::counter!(CAPTURED_ERRORS, "component" => component).increment(1);
}

/// Same as [`capture_error`] for errors that only carry a message.
pub fn capture_message(component: &'static str, message: &str) {
    error!(component, error = message, "Captured unexpected error");
    metrics::counter!(CAPTURED_ERRORS, "component" => component).increment(1);
}
