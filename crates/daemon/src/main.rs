//! quietdiskd - puts idle drives into standby
//!
//! Samples per-device I/O counters on a fixed interval and sends the ATA
//! sleep command to drives that stayed idle for the configured period.

use anyhow::{Context, Result};
use clap::Parser;
use quietdisk_lib::{
    health::{components, HealthRegistry},
    monitor::{resolve_devices, PollLoopBuilder},
    observability::{DaemonMetrics, StructuredLogger},
    power::create_backend,
};
use quietdiskd::{
    api,
    config::{Cli, DaemonConfig, LogFormat},
};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");

fn init_tracing(config: &DaemonConfig) {
    let default_level = if config.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

/// Resolves on the first SIGINT or SIGTERM, naming the signal
async fn wait_for_signal() -> Result<&'static str> {
    let mut interrupt = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT received",
        _ = terminate.recv() => "SIGTERM received",
    };
    Ok(name)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = DaemonConfig::load(&cli)?;
    init_tracing(&config);

    info!(
        idle_period_secs = config.idle_period_secs,
        grace_period_secs = config.grace_period_secs,
        threshold = config.threshold,
        backend = %config.backend,
        "Daemon configured"
    );

    let devices = resolve_devices(&config.discovery(), &config.devices, config.all_devices)
        .await
        .context("Failed to resolve devices")?;

    let health_registry = HealthRegistry::new();
    health_registry.register(components::SAMPLER).await;
    health_registry.register(components::POWER_CONTROL).await;

    let metrics = DaemonMetrics::new();
    metrics.set_devices_tracked(devices.len() as i64);

    let logger = StructuredLogger::for_local_host();
    logger.log_startup(DAEMON_VERSION, &config.backend.to_string(), devices.len());

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let poll_loop = PollLoopBuilder::new()
        .power(create_backend(config.backend))
        .devices(devices)
        .policy(config.policy())
        .all_devices(config.all_devices)
        .discovery(config.discovery())
        .diskstats_path(&config.diskstats_path)
        .health(health_registry.clone())
        .logger(logger.clone())
        .build()?;
    let poll_handle = tokio::spawn(poll_loop.run(shutdown_tx.subscribe()));

    let api_handle = config.metrics_port.map(|port| {
        let state = Arc::new(api::AppState::new(health_registry.clone(), metrics.clone()));
        tokio::spawn(api::serve(port, state, shutdown_tx.subscribe()))
    });

    health_registry.set_ready(true).await;

    let reason = wait_for_signal().await?;
    logger.log_shutdown(reason);
    let _ = shutdown_tx.send(());

    if let Err(e) = poll_handle.await {
        error!(error = %e, "Poll loop task failed");
    }
    if let Some(handle) = api_handle {
        match handle.await {
            Ok(Err(e)) => error!(error = %e, "API server failed"),
            Err(e) => error!(error = %e, "API server task failed"),
            Ok(Ok(())) => {}
        }
    }

    info!("Shutdown complete");
    Ok(())
}
