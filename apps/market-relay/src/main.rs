//! Market Relay Binary
//!
//! Starts the market data cache and broker fan-out relay.
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
//! - `FINNHUB_KEY`: Market data feed API token
//!
//! ## Optional
//! - `FEED_URL`: Feed endpoint (default: wss://ws.finnhub.io)
//! - `TRACKED_SYMBOLS`: Comma-separated symbols (default: AAPL,NVDA)
//! - `FEED_RECONNECT_DELAY_MS`: Feed reconnect delay (default: 3000)
//! - `FEED_IDLE_TIMEOUT_SECS`: Reconnect after this long without frames, 0 disables (default: 90)
//! - `NATS_URL`: Broker URL (default: nats://localhost:4222)
//! - `NATS_USER` / `NATS_PASSWORD` or `NATS_TOKEN`: Broker credentials
//! - `BROKER_SUBJECT`: Subject to relay (default: notifications.>)
//! - `BROKER_QUEUE_GROUP`: Optional queue group
//! - `BROKER_RECONNECT_DELAY_MS`: Broker reconnect delay (default: 3000)
//! - `RELAY_HTTP_PORT`: HTTP port (default: 8000)
//! - `RELAY_METRICS_ENABLED`: Install the Prometheus recorder (default: true)
//! - `CLIENT_BUFFER_CAPACITY`: Per-client buffer (default: 1000)
//! - `CLIENT_PING_INTERVAL_SECS`: Client keep-alive ping interval (default: 30)
//! - `CORS_ORIGINS` / `ALLOW_ALL_ORIGINS`: Browser origin policy
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_relay::application::ports::{BackgroundLoop, MessageSource};
use market_relay::infrastructure::telemetry;
use market_relay::{
    BrokerBridge, ClientRegistry, FeedIngester, HealthState, HttpServer, LinkKind, LinkStatus,
    NatsSource, PriceCache, RelayConfig, RelayState, StartupSupervisor, build_router,
    init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let provider_installed = rustls::crypto::ring::default_provider()
        .install_default()
        .is_ok();

    load_dotenv();

    // Initialize telemetry (tracing + optional OpenTelemetry)
    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting market relay");
    if !provider_installed {
        tracing::warn!("A rustls crypto provider was already installed");
    }

    let config = RelayConfig::from_env().context("failed to load configuration")?;
    log_config(&config);

    if config.server.metrics_enabled
        && let Err(e) = init_metrics()
    {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let shutdown_token = CancellationToken::new();

    // Shared data-plane state
    let cache = Arc::new(PriceCache::new(config.feed.symbols.clone()));
    let registry = Arc::new(ClientRegistry::new(config.sessions.buffer_capacity));
    let feed_status = Arc::new(LinkStatus::new(LinkKind::Feed));
    let broker_status = Arc::new(LinkStatus::new(LinkKind::Broker));

    // HTTP server
    let health_state = Arc::new(HealthState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&feed_status),
        Arc::clone(&broker_status),
        Arc::clone(&registry),
        Arc::clone(&cache),
    ));
    let relay_state = Arc::new(RelayState {
        cache: Arc::clone(&cache),
        registry: Arc::clone(&registry),
        ping_interval: config.sessions.ping_interval,
        write_timeout: config.sessions.write_timeout,
    });
    let app = build_router(relay_state, health_state, &config.server.cors);
    let http_server = HttpServer::new(config.server.http_port, app, shutdown_token.clone());

    let http_shutdown = shutdown_token.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
            http_shutdown.cancel();
        }
    });

    // Background loops
    let feed_ingester = FeedIngester::new(
        config.feed.clone(),
        Arc::clone(&cache),
        Arc::clone(&feed_status),
    );
    let broker_source: Arc<dyn MessageSource> = Arc::new(NatsSource::new(
        config.broker.clone(),
        Arc::clone(&broker_status),
    ));
    let broker_bridge = BrokerBridge::new(
        broker_source,
        Arc::clone(&registry),
        Arc::clone(&broker_status),
        config.broker.reconnect_delay,
    );

    let supervisor = StartupSupervisor::new(shutdown_token.clone(), config.feed.reconnect_delay);
    let loops: Vec<Arc<dyn BackgroundLoop>> = vec![Arc::new(feed_ingester), Arc::new(broker_bridge)];
    let supervisor_handle = supervisor.launch(loops);

    tracing::info!(tasks = ?supervisor_handle.task_names(), "Market relay ready");

    await_shutdown(shutdown_token).await;

    supervisor_handle.shutdown(SHUTDOWN_TIMEOUT).await;
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, http_task).await.is_err() {
        tracing::warn!("HTTP server did not stop in time");
    }

    tracing::info!("Market relay stopped");
    Ok(())
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

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        feed_url = %config.feed.url,
        symbols = ?config.feed.symbols.iter().map(ToString::to_string).collect::<Vec<_>>(),
        broker_url = %config.broker.url,
        broker_subject = %config.broker.subject,
        http_port = config.server.http_port,
        "Configuration loaded"
    );
    tracing::debug!(
        feed_reconnect_ms = config.feed.reconnect_delay.as_millis(),
        broker_reconnect_ms = config.broker.reconnect_delay.as_millis(),
        client_buffer = config.sessions.buffer_capacity,
        cors = ?config.server.cors,
        "Relay settings"
    );
}

/// Wait for a shutdown signal (SIGTERM or SIGINT) or an internal failure.
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
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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
        () = shutdown_token.cancelled() => {
            tracing::warn!("Internal failure, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
