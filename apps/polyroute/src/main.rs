use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use polyroute_common::EnvOverrides;
use polyroute_core::{AppState, ConfigDocument, ProxyService};

mod cli;
mod lifecycle;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log)),
        )
        .init();

    let raw = std::fs::read(&cli.config)
        .with_context(|| format!("reading config {}", cli.config.display()))?;
    let document: ConfigDocument = serde_json::from_slice(&raw)
        .with_context(|| format!("parsing config {}", cli.config.display()))?;

    let state_dir = cli.resolved_state_dir();
    let env = EnvOverrides::from_env();
    let state = AppState::new(&document, env, state_dir.clone())
        .context("building routing table from config")?;
    state.spawn_background_tasks();

    let lifecycle = lifecycle::Lifecycle::new(&state_dir, cli.port);
    lifecycle.on_start();

    let service = ProxyService::new(state);
    let app = polyroute_server::proxy_router(service);

    let bind = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    tracing::info!(bind, "polyroute listening");

    axum_serve(listener, app).await?;

    lifecycle.on_stop();
    Ok(())
}

async fn axum_serve(listener: tokio::net::TcpListener, app: axum::Router) -> Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("server error")
}
