//! replikitd: the replikit daemon.
//!
//! Single binary that assembles all replikit subsystems:
//! - State store (redb)
//! - Admission webhooks
//! - Fleet and replica controllers, run by the manager
//! - REST API
//!
//! # Usage
//!
//! ```text
//! replikitd run --port 8080 --data-dir /var/lib/replikit --config replikit.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use replikit_controller::{Client, Manager, ManagerConfig, enabled_controllers, enabled_webhooks};
use replikit_state::StateStore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,replikitd=debug,replikit=debug";

#[derive(Parser)]
#[command(name = "replikitd", about = "replikit daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the store, the controllers and the API in one process.
    Run {
        /// Port to listen on.
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/replikit")]
        data_dir: PathBuf,

        /// Manager configuration file (TOML).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Workers per controller; overrides the configuration file.
        #[arg(long)]
        workers: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            port,
            data_dir,
            config,
            workers,
        } => run(port, data_dir, config, workers).await,
    }
}

async fn run(
    port: u16,
    data_dir: PathBuf,
    config_path: Option<PathBuf>,
    workers: Option<usize>,
) -> anyhow::Result<()> {
    info!("replikit daemon starting");

    let mut config = match &config_path {
        Some(path) => ManagerConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ManagerConfig::default(),
    };
    if let Some(workers) = workers {
        config.workers = workers;
    }
    config.validate()?;
    info!(?config, "manager configuration loaded");

    // Ensure data directory exists.
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("replikit.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let shutdown = CancellationToken::new();

    // Controllers abort in-flight store calls on shutdown; the API does not,
    // so requests already accepted can finish while the server drains.
    let controller_client = Client::new(store.clone())
        .with_webhooks(enabled_webhooks())
        .with_cancellation(shutdown.clone());
    let api_client = Client::new(store).with_webhooks(enabled_webhooks());

    // ── Start controllers ──────────────────────────────────────

    let manager = Manager::new(controller_client.clone(), config);
    let controllers = enabled_controllers(&controller_client);
    let manager_shutdown = shutdown.clone();
    let manager_handle = tokio::spawn(async move {
        let result = manager.run(controllers, manager_shutdown.clone()).await;
        if let Err(e) = &result {
            error!(error = %e, "manager failed");
            manager_shutdown.cancel();
        }
        result
    });

    // ── Start API server ───────────────────────────────────────

    let router = replikit_api::build_router(api_client);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server_shutdown = shutdown.clone();
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!(error = %e, "failed to listen for ctrl-c");
                }
                info!("shutdown signal received");
            }
            _ = server_shutdown.cancelled() => {}
        }
        server_shutdown.cancel();
    });

    server.await?;
    shutdown.cancel();

    manager_handle.await??;

    info!("replikit daemon stopped");
    Ok(())
}
