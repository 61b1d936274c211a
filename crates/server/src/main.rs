//! Service entry point: config, logging, bootstrap, serve, shut down.

mod bootstrap;
mod handlers;
mod health;
mod webhook;

use std::time::Duration;

use anyhow::Context;
use tokio::sync::Notify;
use tracing::{info, warn};

use parley_core::config::{AppConfig, LoadOptions, LogFormat, LoggingConfig};

use crate::bootstrap::bootstrap;

fn init_logging(logging: &LoggingConfig) {
    let level = logging.level.parse::<tracing::Level>().unwrap_or(tracing::Level::INFO);
    let builder = tracing_subscriber::fmt().with_target(false).with_max_level(level);
    match logging.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run() -> anyhow::Result<()> {
    let config = AppConfig::load(LoadOptions::default()).context("loading configuration")?;
    init_logging(&config.logging);

    let app = bootstrap(&config).await?;

    let address = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding `{address}`"))?;
    info!(event_name = "server_started", address = %address, "listening");

    let shutdown = std::sync::Arc::new(Notify::new());
    let drain = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app.router)
            .with_graceful_shutdown(async move { drain.notified().await })
            .await
    });

    tokio::signal::ctrl_c().await.context("listening for shutdown signal")?;
    info!(event_name = "shutdown_requested", "shutting down");
    shutdown.notify_one();

    let grace = Duration::from_secs(config.server.graceful_shutdown_secs.max(1));
    match tokio::time::timeout(grace, server).await {
        Ok(Ok(Ok(()))) => info!(event_name = "server_stopped", "connections drained"),
        Ok(Ok(Err(err))) => warn!(event_name = "server_error", error = %err, "serve failed"),
        Ok(Err(join_error)) => {
            warn!(event_name = "server_error", error = %join_error, "server task panicked")
        }
        Err(_) => warn!(
            event_name = "shutdown_forced",
            grace_secs = config.server.graceful_shutdown_secs,
            "connections did not drain in time"
        ),
    }

    app.db_pool.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    run().await
}
