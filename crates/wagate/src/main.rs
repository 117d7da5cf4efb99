//! Wagate daemon binary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use wagate::config::Config;
use wagate::dispatch::{Dispatcher, StatusRegistry, spawn_prune_task};
use wagate::resolver::Resolver;
use wagate::server::{AppState, build_app};
use wagate::session::{CredentialStore, SessionManager};
use wagate::staging::Staging;
use wagate_protocol::memory::MemoryNetwork;

/// Single-account messaging network gateway
#[derive(Parser, Debug)]
#[command(name = "wagate")]
#[command(about = "Single-account messaging network gateway")]
#[command(version)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "wagate.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load(&args.config)
        .await
        .with_context(|| format!("could not load config from {}", args.config))?;

    let store = CredentialStore::new(&config.session.credentials_dir);
    let connector = Arc::new(MemoryNetwork::new().with_auto_pair());
    let session = SessionManager::new(
        connector,
        store,
        config.session.device.clone(),
        Duration::from_secs(config.session.reconnect_delay_seconds),
    )
    .spawn();

    let statuses = StatusRegistry::new();
    spawn_prune_task(statuses.clone());

    let staging = Staging::new(&config.staging.dir);
    let dispatcher = Dispatcher::start(
        &config.dispatch,
        session.clone(),
        Resolver::new(&config.resolver.country_code),
        staging.clone(),
        statuses.clone(),
    );

    let state = AppState {
        session: session.clone(),
        dispatcher,
        statuses,
        staging,
    };
    let app = build_app(state, config.server.request_timeout_seconds);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("could not bind {addr}"))?;
    info!(addr = %addr, mode = ?config.dispatch.mode, "wagate listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Keep credentials; the next start resumes the session.
    session.shutdown().await;
    info!("wagate stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not install ctrl-c handler");
        return;
    }
    info!("shutdown signal received");
}
