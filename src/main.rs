//! Postbridge - Telegram channel <-> Mastodon post bridge
//!
//! Mirrors every post made on one configured platform to all the others and
//! keeps the copies in sync when the original is edited.

mod bridge;
mod common;
mod config;
mod endpoint;
mod store;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

use bridge::{Bridge, ChannelBundle};
use common::error::BridgeError;
use config::{env::get_config_path, load_and_validate};
use endpoint::Endpoint;
use store::open_store;

/// Extra time granted to in-flight apply-calls on shutdown, on top of the request timeout.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Postbridge v{} starting...", env!("CARGO_PKG_VERSION"));

    run().await.map_err(|e| {
        error!("Fatal: {}", e);
        e.into()
    })
}

async fn run() -> common::error::Result<()> {
    // Load configuration
    let config_path = get_config_path();
    info!("Loading configuration from {}...", config_path);

    let config = load_and_validate(&config_path).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        error!("Please ensure {} exists and is properly formatted.", config_path);
        e
    })?;

    info!("Configuration loaded successfully");
    for endpoint in &config.endpoints {
        info!("  Endpoint {}: {}", endpoint.id(), endpoint.platform_name());
    }
    info!("  Request timeout: {}s", config.bridge.request_timeout_secs);

    let store = open_store(&config)?;

    // ============================================================
    // Initialize endpoints
    // ============================================================
    let mut endpoints: Vec<Arc<dyn Endpoint>> = Vec::with_capacity(config.endpoints.len());
    for endpoint_config in &config.endpoints {
        let mut endpoint = endpoint::build(endpoint_config);
        info!("Initializing {} endpoint {}...", endpoint.platform(), endpoint.id());
        endpoint.initialize(endpoint_config).await?;
        endpoints.push(Arc::from(endpoint));
    }

    // ============================================================
    // Start the bridge
    // ============================================================
    let channels = ChannelBundle::new(config.bridge.queue_capacity);
    let shutdown_tx = channels.control.shutdown_tx;
    let request_timeout = config.bridge.request_timeout();

    let bridge = Bridge::new(store, endpoints, request_timeout);
    let mut bridge_task = tokio::spawn(bridge.run(channels.listeners, channels.dispatch));
    info!("Bridge running");

    // ============================================================
    // Run until a signal arrives or the bridge stops on its own
    // ============================================================
    let shutdown = tokio::select! {
        biased;
        _ = shutdown_signal() => true,
        joined = &mut bridge_task => {
            bridge_result(joined)?;
            false
        }
    };

    if shutdown {
        info!("Shutdown signal received - stopping bridge...");
        if let Err(e) = shutdown_tx.send(true) {
            debug!("Shutdown channel closed (bridge already exited): {}", e);
        }
        // In-flight apply-calls are bounded by the request timeout.
        match tokio::time::timeout(request_timeout.saturating_add(SHUTDOWN_GRACE), &mut bridge_task).await {
            Ok(joined) => bridge_result(joined)?,
            Err(_) => {
                warn!("Bridge did not stop in time, abandoning in-flight work");
                bridge_task.abort();
            }
        }
    }

    info!("Exiting...");
    Ok(())
}

/// Surface the bridge task's fatal error, re-raising a panic.
fn bridge_result(
    joined: std::result::Result<std::result::Result<(), BridgeError>, JoinError>,
) -> common::error::Result<()> {
    match joined {
        Ok(result) => Ok(result?),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => {
            warn!("Bridge task was cancelled: {}", e);
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
