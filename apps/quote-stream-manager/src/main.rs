//! Quote Stream Manager Binary
//!
//! Starts the subscription manager against a live broker/proxy pair and
//! tails quote updates for a watched code list.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin quote-stream-manager
//! ```
//!
//! # Environment Variables
//!
//! - `QUOTE_BROKER_URL`: Broker WebSocket URL
//!   (default: `ws://localhost:8484/ws-stock/websocket`)
//! - `QUOTE_PROXY_URL`: Proxy base URL (default: `http://localhost:5000`)
//! - `QUOTE_RECONNECT_DELAY_MS`: Fixed reconnect delay (default: 5000)
//! - `QUOTE_RESYNC_INTERVAL_SECS`: Resync interval (default: 30)
//! - `WATCH_CODES`: Comma-separated ticker codes to subscribe
//! - `RUST_LOG`: Log filter (default: `quote_stream_manager=info`)

use std::sync::Arc;
use std::time::Duration;

use quote_stream_manager::infrastructure::telemetry;
use quote_stream_manager::{
    BrokerClientConfig, BrokerEvent, HttpProxyClient, ManagerConfig, ManagerOptions,
    QuoteStreamManager, ReconnectConfig, StompBrokerClient,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    load_dotenv();
    telemetry::init();

    tracing::info!("Starting quote stream manager");

    let config = ManagerConfig::from_env();
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Broker client and its control handle
    let (event_tx, event_rx) = mpsc::channel::<BrokerEvent>(config.broker.event_channel_capacity);
    let broker_config = BrokerClientConfig {
        url: config.broker.url.clone(),
        reconnect: ReconnectConfig {
            delay: config.broker.reconnect_delay,
        },
    };
    let (broker_client, broker_handle) =
        StompBrokerClient::new(broker_config, event_tx, shutdown_token.clone());

    tokio::spawn(async move {
        if let Err(e) = broker_client.run().await {
            tracing::error!(error = %e, "broker client error");
        }
    });

    // Proxy client
    let proxy = Arc::new(HttpProxyClient::new(config.proxy.base_url.clone()));

    // Manager
    let manager = QuoteStreamManager::start(
        Arc::new(broker_handle),
        event_rx,
        proxy,
        ManagerOptions {
            resync_interval: config.resync_interval,
            update_capacity: config.update_channel_capacity,
        },
        shutdown_token.clone(),
    )
    .await;

    // One context for the watch list, if any
    let watch_codes = watch_codes_from_env();
    let watch_context = manager.register_context();
    if watch_codes.is_empty() {
        tracing::info!("WATCH_CODES empty, no initial subscriptions");
    } else {
        tracing::info!(codes = ?watch_codes, "subscribing watch list");
        watch_context.set_codes(watch_codes).await;
    }

    // Tail quote updates
    let mut updates = manager.updates_rx();
    let updates_cancel = shutdown_token.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = updates_cancel.cancelled() => break,
                update = updates.recv() => match update {
                    Ok(quote) => tracing::info!(
                        code = %quote.code,
                        price = %quote.price,
                        change = %quote.price_change,
                        rate = %quote.change_rate,
                        "quote"
                    ),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "quote updates lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });

    tracing::info!("Quote stream manager ready");

    await_shutdown().await;

    watch_context.close().await;
    manager.shutdown().await;

    // Give the broker client a beat to send its DISCONNECT frame.
    tokio::time::sleep(Duration::from_millis(100)).await;

    tracing::info!("Quote stream manager stopped");
    Ok(())
}

/// Parse the comma-separated watch list from the environment.
fn watch_codes_from_env() -> Vec<String> {
    std::env::var("WATCH_CODES")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Log the parsed configuration.
fn log_config(config: &ManagerConfig) {
    tracing::info!(
        broker_url = %config.broker.url,
        proxy_url = %config.proxy.base_url,
        reconnect_delay_ms = config.broker.reconnect_delay.as_millis(),
        resync_interval_secs = config.resync_interval.as_secs(),
        "Configuration loaded"
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
#[allow(clippy::expect_used)]
async fn await_shutdown() {
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
}
