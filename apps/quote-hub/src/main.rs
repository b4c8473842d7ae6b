//! Quote Hub Binary
//!
//! Starts the market data hub with one Yahoo poller per configured source.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin quote-hub
//! ```
//!
//! # Environment Variables
//!
//! - `QUOTE_HUB_CONFIG`: Path to the YAML config (default: config.yaml)
//! - `QUOTE_HUB_BUFFER_SIZE`: Per-subscriber queue capacity
//! - `QUOTE_HUB_INGRESS_CAPACITY`: Shared ingress queue capacity
//! - `QUOTE_HUB_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `QUOTE_HUB_YAHOO_BASE_URL`: Endpoint for sources without a `base_url`
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: quote-hub)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use quote_hub::infrastructure::telemetry;
use quote_hub::{
    HealthServer, HealthServerState, HubConfig, MarketDataService, PrometheusMetrics,
    QuoteHubConfig, YahooQuoteSource, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (tracing + optional OTLP export)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Quote Hub");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = QuoteHubConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let service = Arc::new(MarketDataService::with_metrics(
        HubConfig::from(&config.service),
        Arc::new(PrometheusMetrics),
    ));
    for (name, settings) in &config.datasources {
        let source = YahooQuoteSource::new(name.clone(), settings.yahoo_config())?;
        service.add_source(name.clone(), Arc::new(source))?;
    }

    if config.datasources.is_empty() {
        tracing::warn!("No data sources configured; the hub will idle");
    }

    service.start().await?;

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&service),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!(sources = config.datasources.len(), "Quote hub ready");

    await_shutdown(shutdown_token).await;

    service.stop().await;
    if let Err(e) = health_handle.await {
        tracing::warn!(error = %e, "Health server task failed");
    }

    tracing::info!(stats = ?service.stats(), "Quote hub stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &QuoteHubConfig) {
    tracing::info!(
        sources = config.datasources.len(),
        buffer_size = config.service.buffer_size,
        ingress_capacity = config.service.ingress_capacity,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    for (name, settings) in &config.datasources {
        tracing::debug!(
            source = %name,
            symbols = ?settings.symbols,
            refresh_ms = u64::try_from(settings.refresh_interval.as_millis()).unwrap_or(u64::MAX),
            "Data source configured"
        );
    }
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
    tracing::info!("Graceful shutdown started");
}
