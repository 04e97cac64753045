//! Pingline Binary Entry Point
//!
//! Probes the configured targets and logs a periodic per-target summary.
//! Core functionality is provided by the `pingline` library crate.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pingline::{
    AppConfig, Monitor, TargetRegistry, WindowStats,
    config::{TargetConfig, parse_duration, parse_target_spec},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Pingline - Real-time Multi-target Probe Engine
#[derive(Parser, Debug)]
#[command(name = "pingline", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/pingline.yaml",
        env = "PINGLINE_CONFIG"
    )]
    config: String,

    /// Probe interval (overrides config file), e.g. "500ms"
    #[arg(long, env = "PINGLINE_INTERVAL", value_parser = parse_duration)]
    interval: Option<Duration>,

    /// Extra target as NAME=ADDR (repeatable)
    #[arg(short, long = "target", value_parser = parse_target_spec)]
    targets: Vec<(String, String)>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pingline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Pingline - Real-time Multi-target Probe Engine");

    let cli = Cli::parse();

    // A missing config file is fine when targets come from the command line
    let mut config = if Path::new(&cli.config).exists() {
        tracing::info!("Loading configuration from: {}", cli.config);
        AppConfig::load(&cli.config)?
    } else {
        tracing::info!("No configuration at {}, using defaults", cli.config);
        AppConfig::default()
    };

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(interval) = cli.interval {
        config.ping.probe.interval = interval;
    }
    config.targets.extend(
        cli.targets
            .into_iter()
            .map(|(name, addr)| TargetConfig::new(name, addr)),
    );
    config.validate()?;

    if config.enabled_targets().next().is_none() {
        return Err(
            "no targets configured; pass --target NAME=ADDR or list them in the config".into(),
        );
    }

    let settings = config.ping.probe.clone();
    tracing::info!(
        "Interval: {:?}, MaxRTT: {:?}, GraceLate: {:?}, ring capacity: {}",
        settings.effective_interval(),
        settings.effective_max_rtt(),
        settings.effective_grace_late(),
        config.ping.ring_capacity,
    );

    let registry = Arc::new(TargetRegistry::new());
    let monitor = Monitor::new(Arc::clone(&registry), settings);

    for target in config.enabled_targets() {
        monitor
            .add_target(&target.name, &target.addr, config.ping.ring_capacity)
            .await?;
    }

    for (id, e) in monitor.start_all().await {
        tracing::error!("Failed to start target {}: {}", id, e);
    }

    tracing::info!("Probing {} targets, press Ctrl+C to stop", registry.count());

    let mut report = tokio::time::interval(config.report_interval);
    report.tick().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = report.tick() => {
                for (id, e) in monitor.reap_finished().await {
                    tracing::error!("Target {} stopped probing: {}", id, e);
                }
                log_summary(&registry);
            }
        }
    }

    tracing::info!("Shutting down probe loops...");
    if !monitor.shutdown().await {
        tracing::warn!("Some probe loops did not stop in time");
    }

    log_summary(&registry);
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Log one summary line per target.
fn log_summary(registry: &TargetRegistry) {
    for target in registry.list_targets() {
        let stats = WindowStats::from_samples(&target.snapshot());
        tracing::info!(
            target_name = %target.name(),
            addr = %target.addr(),
            state = %target.run_state(),
            probes = stats.total(),
            ok = stats.ok,
            lost = stats.lost,
            late = stats.late,
            loss_pct = %format!("{:.1}", stats.loss_percent()),
            min_ms = ?stats.min_ms,
            avg_ms = ?stats.avg_ms.map(|v| (v * 100.0).round() / 100.0),
            max_ms = ?stats.max_ms,
            "Summary"
        );
    }
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
