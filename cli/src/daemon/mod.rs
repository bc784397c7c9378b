// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon mode implementation
//!
//! Handles:
//! - Boot through the add-on startup stages
//! - Periodic evaluation, checks and autofix
//! - Forwarding add-on state changes as Home Assistant messages
//! - Graceful shutdown in reverse stage order

use anyhow::{Context, Result};
use futures::future::join_all;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use supervisor_core::domain::addon::AddonStartup;
use supervisor_core::domain::core_state::CoreState;
use supervisor_core::domain::supervisor_config::SupervisorConfigManifest;
use supervisor_core::infrastructure::event_bus::{DomainEvent, EventBus, EventBusError};

use crate::embedded::EmbeddedSupervisor;

pub const ADDONS_INSTALLED: &str = "supervisor_addons_installed";
pub const ISSUES_OPEN: &str = "supervisor_resolution_issues";

pub async fn start_daemon(config: SupervisorConfigManifest) -> Result<()> {
    let pid = std::process::id();
    info!("Supervisor daemon starting (PID: {})", pid);

    if config.spec.observability.metrics.enabled {
        install_metrics_exporter(config.spec.observability.metrics.port)?;
    }

    let supervisor = Arc::new(EmbeddedSupervisor::new(config).await?);
    info!("Configuration loaded: name={}", supervisor.config.metadata.name);

    boot(&supervisor).await;

    let shutdown = CancellationToken::new();
    let mut loops = spawn_resolution_loops(&supervisor, &shutdown);
    loops.push(forward_addon_events(
        &supervisor.event_bus,
        shutdown.clone(),
        |message| info!(target: "supervisor::home_assistant", %message, "Add-on event"),
    ));

    shutdown_signal().await;
    supervisor.core_state.set(CoreState::Shutdown);
    shutdown.cancel();
    join_all(loops).await;

    supervisor.core_state.set(CoreState::Stopping);
    for stage in AddonStartup::BOOT_ORDER.iter().rev() {
        supervisor.manager.shutdown(*stage).await;
    }
    supervisor.core_state.set(CoreState::Close);

    info!("Supervisor daemon stopped");
    Ok(())
}

/// Walks the Supervisor from `Initialize` to `Running`.
pub async fn boot(supervisor: &EmbeddedSupervisor) {
    let manager = &supervisor.manager;

    supervisor.evaluation.evaluate_system().await;

    supervisor.core_state.set(CoreState::Setup);
    manager.load().await;
    supervisor.evaluation.evaluate_system().await;

    supervisor.core_state.set(CoreState::Startup);
    for stage in &AddonStartup::BOOT_ORDER[..3] {
        manager.boot(*stage).await;
    }
    supervisor.checks.check_system().await;

    supervisor.core_state.set(CoreState::Running);
    manager.boot(AddonStartup::Application).await;
    manager.sync_dns().await;
    supervisor.evaluation.evaluate_system().await;
    supervisor.checks.check_system().await;
    record_gauges(supervisor);

    info!(
        addons = manager.installed().len(),
        supported = supervisor.resolution.is_supported(),
        healthy = supervisor.resolution.is_healthy(),
        "Supervisor is up and running"
    );
}

fn spawn_resolution_loops(
    supervisor: &Arc<EmbeddedSupervisor>,
    shutdown: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let resolution = &supervisor.config.spec.resolution;
    let schedule = [
        ("evaluate", resolution.evaluation_interval_seconds),
        ("check", resolution.check_interval_seconds),
        ("autofix", resolution.autofix_interval_seconds),
    ];

    schedule
        .into_iter()
        .map(|(task, seconds)| {
            let supervisor = supervisor.clone();
            periodic(task, Duration::from_secs(seconds), shutdown.clone(), move || {
                let supervisor = supervisor.clone();
                async move {
                    match task {
                        "evaluate" => supervisor.evaluation.evaluate_system().await,
                        "check" => supervisor.checks.check_system().await,
                        _ => supervisor.fixups.run_autofix().await,
                    }
                    record_gauges(&supervisor);
                }
            })
        })
        .collect()
}

fn periodic<F, Fut>(
    task: &'static str,
    every: Duration,
    shutdown: CancellationToken,
    mut run: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately; boot already ran each task once.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    debug!(task, "Running scheduled resolution task");
                    run().await;
                }
            }
        }
        debug!(task, "Scheduled resolution task stopped");
    })
}

/// Hands the Home Assistant payload of every add-on state change to `send`
/// until shutdown.
fn forward_addon_events<F>(event_bus: &EventBus, shutdown: CancellationToken, mut send: F) -> JoinHandle<()>
where
    F: FnMut(serde_json::Value) + Send + 'static,
{
    let mut events = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(DomainEvent::Addon(event)) => {
                    if let Some(message) = event.to_home_assistant() {
                        send(message);
                    }
                }
                Ok(DomainEvent::Resolution(_)) | Err(EventBusError::Lagged(_)) => {}
                Err(_) => break,
            }
        }
        debug!("Add-on event forwarding stopped");
    })
}

fn record_gauges(supervisor: &EmbeddedSupervisor) {
    metrics::gauge!(ADDONS_INSTALLED).set(supervisor.manager.installed().len() as f64);
    metrics::gauge!(ISSUES_OPEN).set(supervisor.resolution.issues().len() as f64);
}

fn install_metrics_exporter(port: u16) -> Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
