//! `latch`: serves the card/scan API and relays every change to connected
//! viewers over WebSocket.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use latch_bus::InProcessBus;
use latch_server::LatchServer;
use latch_settings::LatchSettings;
use latch_store::AccessStore;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "latch", version, about = "Access-control change relay")]
struct Args {
    /// Settings file (defaults to `~/.latch/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (`0` auto-assigns).
    #[arg(long)]
    port: Option<u16>,

    /// `SQLite` database file; omit to keep records in memory.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Disable the `/metrics` endpoint.
    #[arg(long, default_value_t = false)]
    no_metrics: bool,
}

impl Args {
    /// Apply command-line overrides, which win over file and environment.
    fn apply(&self, settings: &mut LatchSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(path) = &self.db_path {
            settings.store.db_path = Some(path.clone());
        }
    }
}

fn load_settings(args: &Args) -> Result<LatchSettings> {
    let path = args.config.clone().unwrap_or_else(latch_settings::settings_path);
    let mut settings = latch_settings::load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    args.apply(&mut settings);
    settings.validate().context("invalid settings")?;
    Ok(settings)
}

fn open_store(settings: &LatchSettings) -> Result<AccessStore> {
    let limit = settings.store.history_limit;
    match &settings.store.db_path {
        Some(path) => AccessStore::open(path, limit)
            .with_context(|| format!("failed to open store at {}", path.display())),
        None => {
            warn!("no dbPath configured, records are kept in memory only");
            AccessStore::in_memory(limit).context("failed to open in-memory store")
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                let _ = signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = load_settings(&args)?;
    latch_logging::init_subscriber(&settings.logging).context("failed to initialise logging")?;

    let store = Arc::new(open_store(&settings)?);
    let bus = Arc::new(InProcessBus::new(settings.relay.bus_capacity));

    let mut server = LatchServer::new(settings, store, bus.clone());
    if !args.no_metrics {
        let handle =
            latch_server::metrics::install_recorder().context("failed to install metrics recorder")?;
        server = server.with_metrics(handle);
    }

    let handle = server.listen().await?;
    info!(addr = %handle.addr(), topic = %server.settings().relay.topic, "latch started");

    shutdown_signal().await;
    info!("shutdown requested");

    let drained = server.shutdown_gracefully(handle).await;
    bus.close();
    if drained {
        info!("latch stopped");
    } else {
        warn!("latch stopped with connections still draining");
    }
    Ok(())
}
