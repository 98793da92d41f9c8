// api-gateway-rs/src/main.rs
// Suggestion API Gateway
// Port 8000 - HTTP entry point for the keyboard extension and the app

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use api_gateway::rate_limit::{RateLimiter, DEFAULT_PURGE_SECS};
use api_gateway::ApiGateway;
use error_handling_rs::{init_logging, LoggingConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use suggestion_engine_rs::SuggestionEngine;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = config_rs::load_dotenv();

    init_logging(Some(LoggingConfig::from_env("api-gateway")))
        .map_err(|e| anyhow!("failed to initialize logging: {}", e))?;
    if let Some(path) = dotenv {
        info!(path = %path.display(), "Loaded environment file");
    }

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder unavailable; /metrics will return 503");
            None
        }
    };

    let engine = Arc::new(SuggestionEngine::from_env().context("invalid engine configuration")?);
    let shutdown = CancellationToken::new();
    let sweeper = engine.spawn_sweeper(shutdown.clone());

    let limiter = RateLimiter::from_env();
    let gateway = Arc::new(ApiGateway::new(engine, limiter, metrics));
    let purger = gateway.limiter().clone().spawn_purger(
        Duration::from_secs(config_rs::env_or("RATE_LIMIT_PURGE_SECS", DEFAULT_PURGE_SECS)),
        shutdown.clone(),
    );
    let app = gateway.create_router();

    let addr = config_rs::get_bind_address("API_GATEWAY", 8000);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "API Gateway listening");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            signal.cancel();
        })
        .await
        .context("server error")?;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "Session sweeper did not stop cleanly");
    }
    if let Err(e) = purger.await {
        warn!(error = %e, "Rate limit purger did not stop cleanly");
    }
    info!("API Gateway stopped");
    Ok(())
}
