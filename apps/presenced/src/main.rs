//! # presenced
//!
//! Presence tracking daemon.
//!
//! ## Startup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  parse CLI ──► init tracing ──► load config (file → env → validate)    │
//! │                                        │                                │
//! │                                        ▼                                │
//! │                     build sources (radio / network / announce)         │
//! │                                        │                                │
//! │                                        ▼                                │
//! │          start notifier ──► PresenceDaemon.run until SIGINT/SIGTERM    │
//! │                                        │                                │
//! │                                        ▼                                │
//! │                    stop sources ──► drain notifier ──► exit            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use presence_core::event::device_line;
use presence_scan::{
    build_orchestrator, sink_from_settings, Notifier, PresenceConfig, PresenceDaemon,
    SystemRunner,
};
use presence_store::StateStore;
use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "presenced", version, about = "Tracks which devices are nearby")]
struct Cli {
    /// Config file (defaults to the per-user config directory)
    #[arg(short, long, env = "PRESENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the scan loop until interrupted (default)
    Run,
    /// Run a single scan cycle and print what was seen
    ScanOnce,
    /// Print the persisted device table
    ShowState,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = PresenceConfig::load(cli.config)?;
    info!(
        state = %config.state_path().display(),
        radio = config.radio.enabled,
        network = config.network.enabled,
        announce = config.announce.enabled,
        "Configuration loaded"
    );

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await?,
        Command::ScanOnce => scan_once(config).await?,
        Command::ShowState => show_state(&config)?,
    }
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,presence=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(config: PresenceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let orchestrator = build_orchestrator(&config, Arc::new(SystemRunner));
    let store = StateStore::new(config.state_path());
    let (notifier, notifier_task) = Notifier::new(vec![sink_from_settings(&config.alerts)?]).start();

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    });

    let daemon = PresenceDaemon::new(&config, orchestrator, store, notifier.clone())?;
    let result = daemon.run(&config, stop_rx).await;

    if let Err(e) = notifier.shutdown().await {
        warn!(error = %e, "Notifier already stopped");
    }
    if let Err(e) = notifier_task.await {
        warn!(error = %e, "Notifier task ended abnormally");
    }

    match result {
        Ok(table) => {
            info!(
                devices = table.len(),
                present = table.present_count(),
                "Daemon stopped"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon failed");
            Err(e.into())
        }
    }
}

async fn scan_once(config: PresenceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut orchestrator = build_orchestrator(&config, Arc::new(SystemRunner));
    orchestrator.initialize().await?;
    let report = orchestrator.run_cycle().await;
    orchestrator.shutdown().await;

    for failure in &report.failures {
        warn!(source = failure.source, error = %failure.error, "Source failed");
    }
    for sighting in report.sightings.iter() {
        println!(
            "{}",
            device_line(
                &sighting.display_name,
                &sighting.key,
                sighting.device_kind,
                sighting.signal_strength,
            )
        );
    }
    info!(
        sightings = report.sightings.len(),
        filtered = report.filtered,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Scan complete"
    );
    Ok(())
}

fn show_state(config: &PresenceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let table = StateStore::new(config.state_path()).load();
    let devices: Vec<_> = table
        .iter()
        .map(|device| {
            json!({
                "key": device.key.as_str(),
                "name": device.display_name,
                "type": device.device_kind.label(),
                "rssi": device.signal_strength,
                "last_seen": device.last_seen.to_rfc3339(),
                "status": device.status.to_string(),
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&devices)?);
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping scan loop");
}
