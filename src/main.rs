//! # tide
//!
//! Server binary: loads settings, opens the store, and serves until a
//! shutdown signal arrives.

#![deny(unsafe_code)]

mod telemetry;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tide_server::TideServer;
use tide_server::metrics::install_recorder;
use tide_settings::TideSettings;
use tide_store::{ConnectionConfig, TodoStore};
use tracing::{info, warn};

/// Real-time todo sync server.
#[derive(Parser, Debug)]
#[command(name = "tide", about = "Real-time todo sync server")]
struct Cli {
    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` database.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Log filter directive, e.g. `debug` or `tide_server=trace`.
    #[arg(long)]
    log_level: Option<String>,

    /// Settings file (defaults to `tide.json` in the working directory).
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    /// Flags override every other settings layer.
    fn apply(&self, settings: &mut TideSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(path) = &self.db_path {
            settings.store.db_path = path.to_string_lossy().into_owned();
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }

    fn settings(&self) -> Result<TideSettings> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(tide_settings::settings_path);
        let mut settings = tide_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        self.apply(&mut settings);
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }
}

fn open_store(settings: &TideSettings) -> Result<TodoStore> {
    let config = ConnectionConfig {
        pool_size: settings.store.pool_size,
        busy_timeout_ms: settings.store.busy_timeout_ms,
        ..ConnectionConfig::default()
    };
    let path = Path::new(&settings.store.db_path);
    let store = TodoStore::open(path, &config)
        .with_context(|| format!("Failed to open database: {}", path.display()))?;
    info!(path = %path.display(), "database opened");
    Ok(store)
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
            _ = term.recv() => {}
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for ctrl-c")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings()?;
    telemetry::init_logging(&settings.logging);

    let store = open_store(&settings)?;
    let mut server = TideServer::new(&settings, store);
    match install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(err) => warn!(error = %err, "metrics recorder not installed"),
    }

    let listener = server
        .bind()
        .await
        .with_context(|| format!("Failed to bind {}", settings.server.bind_addr()))?;
    let addr = listener.local_addr()?;
    info!("tide listening on http://{addr}");

    let shutdown = server.shutdown_handle();
    let mut serve = tokio::spawn(server.serve(listener));

    tokio::select! {
        res = &mut serve => {
            res.context("Server task panicked")?.context("Server failed")?;
            return Ok(());
        }
        res = shutdown_signal() => res?,
    }

    info!("shutting down");
    shutdown.shutdown();
    serve
        .await
        .context("Server task panicked")?
        .context("Server failed")?;
    info!("shutdown complete");
    Ok(())
}
