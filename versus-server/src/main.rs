use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use versus_server::{AppState, ServerConfig, ServerError, routes};

#[tokio::main]
/// Activates tracing, validates the configuration, spawns the pairing worker and the two
/// clean up tasks, then serves the API and the web sockets until SIGINT or SIGTERM.
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "versus_server=debug,tower_http=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true),
        )
        .init();

    let config = ServerConfig::parse();
    if let Err(err) = config.validate() {
        tracing::error!(%err, "Invalid configuration.");
        return Err(err.into());
    }

    let state = Arc::new(AppState::in_memory());
    state.matchmaking.spawn_worker();
    spawn_inactivity_sweeper(state.clone(), &config);
    spawn_session_expiry(state.clone(), &config);

    let app = routes::router(state.clone(), &config);
    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|err| ServerError::InvalidConfig {
            reason: format!("cannot bind {address}: {err}"),
        })?;
    tracing::info!(%address, "Server listening.");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;
    tracing::info!("Server stopped.");
    Ok(())
}

/// Logs out players that stayed silent for longer than the inactivity timeout.
fn spawn_inactivity_sweeper(state: Arc<AppState>, config: &ServerConfig) {
    let period = config.sweep_interval();
    let threshold = config.inactivity_timeout();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if let Err(err) = state.sweep_inactive(threshold).await {
                tracing::error!(?err, "Inactivity sweep failed.");
            }
        }
    });
}

/// Deletes finished sessions once nobody can ask for a rematch any more.
fn spawn_session_expiry(state: Arc<AppState>, config: &ServerConfig) {
    let period = config.sweep_interval();
    let retention = config.session_retention();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if let Err(err) = state.orchestrator.prune_finished(retention).await {
                tracing::error!(?err, "Session expiry failed.");
            }
        }
    });
}

/// Resolves on SIGINT or SIGTERM, after every open connection got its close frame.
async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(?err, "Cannot listen for Ctrl+C.");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(?err, "Cannot listen for SIGTERM.");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutting down.");
    state.connections.shutdown().await;
}
