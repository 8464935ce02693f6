//! Lanward kernel entry point: config, registry, probe loop, dispatch,
//! HTTP. Bootstrap order matters - the probe loop and the dispatcher
//! run on independent timers and locks, so neither ever blocks the
//! other.

use lanward::commander::LanCommander;
use lanward::config::load_config;
use lanward::dispatch::CommandDispatcher;
use lanward::http::{build_router, AppState};
use lanward::probe::{Prober, TcpPinger};
use lanward::registry::HostRegistry;
use lanward::status::StatusCache;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Ok if .env does not exist

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lanward=info")),
        )
        .init();

    let cfg = load_config().await;

    let registry = Arc::new(HostRegistry::new(&cfg.data_file));
    if let Err(e) = registry.load().await {
        error!("failed to load hosts: {e:#}");
    }

    let cache = StatusCache::new();

    let commander = Arc::new(LanCommander::new(
        registry.clone(),
        cfg.wol.as_ref().and_then(|w| w.broadcast.clone()),
        cfg.agent_timeout(),
    ));
    let dispatcher = CommandDispatcher::new(registry.clone(), commander, cfg.cooldown());

    let prober = Prober::new(
        registry.clone(),
        cache.clone(),
        Arc::new(TcpPinger),
        cfg.probe_interval(),
        cfg.probe_timeout(),
    );
    let probe_handle = prober.spawn();

    let app = build_router(AppState { registry, cache, dispatcher });

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    info!("listening on http://{addr}");
    let listener = TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app).await.context("http server")?;

    probe_handle.stop().await;
    Ok(())
}
