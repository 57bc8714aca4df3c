use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::runtime::build_analysis_service;
use crate::audit::AxeScript;
use crate::config::Config;
use crate::metrics;
use crate::server::{build_router, ServeHealth, ServeState};

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Port to listen on (defaults to server.port / PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Interface to bind (defaults to server.host)
    #[arg(long)]
    pub host: Option<String>,
}

pub async fn cmd_serve(args: ServeArgs, config: Config) -> Result<()> {
    let host = args.host.unwrap_or_else(|| config.server.host.clone());
    let port = args.port.unwrap_or(config.server.port);

    metrics::register_metrics();
    let health = Arc::new(ServeHealth::new());
    health.mark_live();

    let client = reqwest::Client::new();
    let axe = match AxeScript::load(&config.audit.axe_source, &client).await {
        Ok(script) => {
            health.mark_ready();
            Some(Arc::new(script))
        }
        Err(err) => {
            error!(error = %err, "axe-core unavailable; /analyze will fail until restart");
            health.mark_unready(err.to_string());
            None
        }
    };

    let service = build_analysis_service(&config, axe, config.audit.settings())?;
    let state = ServeState::new(Arc::new(service), health);
    let router = build_router(state, &config.server.allowed_origins);

    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("failed to bind {host}:{port}"))?;
    info!(
        host = %host,
        port,
        origins = ?config.server.allowed_origins,
        "accessly server listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited unexpectedly")?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(?err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
