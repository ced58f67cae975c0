//! Chat Gateway - Binary Entry Point

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use chat_gateway::store::{ChangeFeed, ChatStore};
use chat_gateway::{
    create_router, logging, AppState, Config, FanoutBridge, JwtAuth, MemoryChangeFeed,
    MemoryStore,
};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;
    logging::init(config.log_json);
    info!(version = chat_gateway::VERSION, "chat gateway starting");

    let feed = MemoryChangeFeed::new(config.feed_capacity);
    let store: Arc<dyn ChatStore> = Arc::new(MemoryStore::new(feed.clone()));
    let feed: Arc<dyn ChangeFeed> = Arc::new(feed);
    let identity = Arc::new(JwtAuth::new(&config.jwt_secret)?);
    let state = Arc::new(AppState::new(&config, Arc::clone(&store), identity));

    let cancel = CancellationToken::new();
    let janitor = state
        .tickets
        .spawn_janitor(config.ticket_sweep(), cancel.clone());
    let bridge = Arc::new(FanoutBridge::new(
        store,
        Arc::clone(&state.registry),
        config.feed_backoff(),
    ));
    let bridge = tokio::spawn(bridge.run(feed, cancel.clone()));

    let listener = tokio::net::TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("binding {}", config.bind_addr()))?;
    info!(addr = %listener.local_addr()?, "listening");

    let shutdown = cancel.clone();
    let registry = Arc::clone(&state.registry);
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
            // Upgraded sockets are closed here, each with a close frame
            let closed = registry.close_all();
            info!(sessions = closed, "shutting down");
        })
        .await?;

    let drain = futures::future::join_all([janitor, bridge]);
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
        warn!("background tasks did not stop within {SHUTDOWN_TIMEOUT:?}");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("ctrl-c received"),
        _ = terminate => info!("SIGTERM received"),
    }
}
