//! Market Relay Binary
//!
//! Starts the market data relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `POLYGON_API_KEY`: Vendor API key
//!
//! ## Optional
//! - `RELAY_HOST`: Bind address (default: 0.0.0.0)
//! - `WS_PORT`: Relay WebSocket port (default: 3001)
//! - `RELAY_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `POLYGON_STOCKS_WS_URL` / `POLYGON_OPTIONS_WS_URL`: Vendor endpoints
//! - `RELAY_RECONNECT_DELAY_MS`: Upstream reconnect step (default: 5000)
//! - `RELAY_MAX_RECONNECT_ATTEMPTS`: Upstream attempt cap (default: 5)
//! - `RELAY_CLIENT_QUEUE_CAPACITY`: Frames buffered per client before eviction (default: 1024)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `RUST_LOG`: Log level (default: info)

use std::time::Duration;

use anyhow::Context;
use market_relay::infrastructure::telemetry;
use market_relay::{RelayApp, RelayConfig, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider was already installed");
    }

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting market relay");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = RelayConfig::from_env().context("invalid relay configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let app = RelayApp::bind(&config, shutdown_token.clone())
        .await
        .context("failed to bind relay listeners")?;
    let mut relay = tokio::spawn(app.run());

    let finished = tokio::select! {
        () = await_shutdown(shutdown_token.clone()) => None,
        joined = &mut relay => Some(joined),
    };

    let joined = match finished {
        Some(joined) => {
            shutdown_token.cancel();
            joined
        }
        None => match tokio::time::timeout(SHUTDOWN_TIMEOUT, relay).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::warn!(
                    timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                    "Relay did not stop in time"
                );
                return Ok(());
            }
        },
    };
    joined.context("relay task panicked")??;

    tracing::info!("Market relay stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        relay_addr = %config.relay_addr(),
        health_addr = %config.health_addr(),
        max_symbols = config.downstream.limits.max_symbols_per_subscribe,
        max_contracts = config.downstream.limits.max_contracts_per_subscribe,
        "Configuration loaded"
    );
    tracing::debug!(
        stocks_url = %config.upstream.stocks_url,
        options_url = %config.upstream.options_url,
        reconnect_delay_ms = u64::try_from(config.websocket.reconnect_delay.as_millis()).unwrap_or(u64::MAX),
        max_reconnect_attempts = config.websocket.max_reconnect_attempts,
        "Upstream endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

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
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
