//! Headless service entry point. Loads every instance config from a
//! directory, builds the registry, and serves one WebSocket listener per
//! port plus a single admin listener for the command surface (§6).
//! Grounded in the teacher's `server::listener::RtmpServer::run_until`
//! graceful-shutdown shape, adapted from a single bind address to one
//! listener per instance port, and in the teacher's CLI-less `main.rs`
//! convention replaced here with `clap` (per the ambient stack).

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use castrelay::api::{self, AdminState, StreamState};
use castrelay::command::NullWindowHelper;
use castrelay::config;
use castrelay::registry::Registry;

/// Multi-instance media ingest-and-fanout service.
#[derive(Parser, Debug)]
#[command(name = "castrelay-server", version, about)]
struct Cli {
    /// Directory containing one JSON config file per instance.
    #[arg(long, env = "CASTRELAY_CONFIG_DIR")]
    config_dir: std::path::PathBuf,

    /// Project root that relative paths inside configs resolve against.
    /// Defaults to `config_dir`.
    #[arg(long, env = "CASTRELAY_PROJECT_ROOT")]
    project_root: Option<std::path::PathBuf>,

    /// Base port to start scanning from when a config doesn't pin one.
    #[arg(long, env = "CASTRELAY_BASE_PORT", default_value_t = 9000)]
    base_port: u16,

    /// Address the admin/status HTTP API binds to.
    #[arg(long, env = "CASTRELAY_ADMIN_ADDR", default_value = "127.0.0.1:9900")]
    admin_addr: SocketAddr,

    /// Log filter, e.g. `info`, `castrelay=debug`.
    #[arg(long, env = "CASTRELAY_LOG", default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "castrelay-server exiting with a startup error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let project_root = cli.project_root.clone().unwrap_or_else(|| cli.config_dir.clone());

    let configs = config::load_directory(&cli.config_dir, &project_root)?;
    tracing::info!(count = configs.len(), dir = %cli.config_dir.display(), "loaded instance configs");

    let registry = Arc::new(Registry::new(
        Arc::new(NullWindowHelper),
        cli.base_port,
        "0.0.0.0".to_string(),
    ));

    for config in configs {
        let name = config.name.clone();
        if let Err(e) = registry.create(config).await {
            anyhow::bail!("failed to register instance `{name}`: {e}");
        }
    }

    let ports = registry.ports().await;
    tracing::info!(ports = ?ports, "binding stream listeners");

    let mut tasks = Vec::new();
    for port in ports {
        let state = StreamState {
            registry: registry.clone(),
            port,
        };
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        tasks.push(tokio::spawn(serve(addr, api::stream_router(state))));
    }

    let admin_state = AdminState {
        registry: registry.clone(),
    };
    tasks.push(tokio::spawn(serve(
        cli.admin_addr,
        api::admin_router(admin_state),
    )));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
        _ = futures::future::select_all(tasks) => {
            tracing::error!("a listener task exited unexpectedly");
        }
    }

    registry.stop_all().await;
    Ok(())
}

async fn serve(addr: SocketAddr, router: axum::Router) {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind listener");
            return;
        }
    };
    tracing::info!(%addr, "listening");
    if let Err(e) = axum::serve(listener, router).await {
        tracing::error!(%addr, error = %e, "listener exited with an error");
    }
}
