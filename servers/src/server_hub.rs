//! # Hub Server
//!
//! Relays envelopes from the Redis list to live WebSocket connections and
//! serves the hub's HTTP surface on the same port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use lib_hub::loggers::setup_logging;
use lib_hub::{
    build_router, load_config, ApiForwarder, ConnectionRegistry, HubState, RedisQueue, RelayLoop,
    RelayStats,
};

/// How long the relay gets to notice cancellation once the listener is closed.
const RELAY_STOP_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config().context("Failed to load configuration")?;
    let _guard = setup_logging(&config.log_dir, &config.log_level, config.max_log_files)
        .context("Failed to initialize logging")?;

    tracing::info!(
        port = config.port,
        root_path = %config.root_path.display(),
        proxy_url = %config.proxy_url,
        redis = %format!("{}:{}", config.redis_host, config.redis_port),
        queue = %config.queue_name,
        "Starting hub server"
    );

    let shutdown = CancellationToken::new();
    let registry = ConnectionRegistry::new();
    let stats = Arc::new(RelayStats::new());

    let queue = RedisQueue::new(
        &config.redis_url,
        config.queue_name.clone(),
        config.pop_timeout,
        config.reconnect,
    )
    .context("Invalid Redis settings")?;
    let health = queue.health();

    let relay_handle = tokio::spawn(
        RelayLoop::new(queue, registry.clone(), stats.clone(), shutdown.clone()).run(),
    );

    let state = HubState {
        registry: registry.clone(),
        stats,
        health,
        forwarder: ApiForwarder::new(&config.proxy_url)?,
        shutdown: shutdown.clone(),
    };
    let app = build_router(state, &config.root_path);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Server started at http://localhost:{}", config.port);

    let server_shutdown = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, closing connections");
            // Sessions close on the same token, which lets the server drain.
            server_shutdown.cancel();
        })
        .await;

    // Covers the case where the server stopped on an error rather than a signal.
    shutdown.cancel();
    let closed = registry.close_all();
    tracing::info!(closed, "Connections closed");

    match tokio::time::timeout(RELAY_STOP_GRACE, relay_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Relay task failed"),
        Err(_) => tracing::warn!("Relay loop did not stop in time"),
    }

    served.context("Server error")?;
    tracing::info!("Shutdown complete.");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
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
        _ = ctrl_c => tracing::info!("Ctrl-C received, initiating shutdown."),
        _ = terminate => tracing::info!("SIGTERM received, initiating shutdown."),
    }
}
