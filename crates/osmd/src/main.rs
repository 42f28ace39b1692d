//! osmd - skills manager sync daemon
//!
//! Runs a sync pass on start and then every interval.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use clap::Parser;
use eyre::WrapErr;
use osm_core::events::{EventSink, TracingSink};
use osm_core::Config;
use osmd::sync::SyncOptions;
use osmd::{Daemon, DaemonConfig, SkillsManager};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "osmd", about = "Skills manager sync daemon", version)]
struct Cli {
    /// Settings file (key=value)
    #[arg(long, env = "OSM_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds between passes (overrides sync_interval_sec)
    #[arg(long)]
    interval: Option<u64>,

    /// Run one pass and exit
    #[arg(long)]
    once: bool,

    /// Only fetch skills not already in the catalog
    #[arg(long)]
    new_only: bool,
}

fn main() {
    let cli = Cli::parse();

    // Initialize tracing.
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    if let Err(e) = runtime.block_on(run(cli)) {
        error!("osmd failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> eyre::Result<()> {
    let config = Config::load(cli.config.as_deref()).wrap_err("failed to load settings")?;
    let interval = cli
        .interval
        .map_or_else(|| config.sync_interval(), Duration::from_secs);

    let sink: Arc<dyn EventSink> = Arc::new(TracingSink);
    let manager = SkillsManager::open(config, sink).wrap_err("failed to open skills manager")?;
    let daemon = Arc::new(Daemon::new(
        Arc::new(manager),
        DaemonConfig {
            interval,
            once: cli.once,
            options: SyncOptions {
                new_only: cli.new_only,
                ..SyncOptions::default()
            },
        },
    ));

    // Signals only request shutdown; the running pass finishes the sources
    // it already started and persists.
    let signal_daemon = Arc::clone(&daemon);
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
            let mut sigint =
                signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
            tokio::select! {
                _ = sigint.recv() => tracing::info!("received SIGINT, initiating graceful shutdown"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM, initiating graceful shutdown"),
            }
        }

        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received SIGINT, initiating graceful shutdown");
            }
        }
        signal_daemon.shutdown();
    });

    daemon.run().await.wrap_err("sync loop stopped")
}
