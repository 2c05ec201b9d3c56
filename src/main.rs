//! Partition Gateway
//!
//! Accepts partition requests, splits large PDFs across workers and streams
//! the merged elements back.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use partition_gateway::admission::AdmissionGate;
use partition_gateway::config::Config;
use partition_gateway::routes;
use partition_gateway::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "partition_gateway=debug,tower_http=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Invalid configuration")?;

    tracing::info!("Starting Partition Gateway v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Partition engine: {}", config.engine.url);
    if config.parallel.enabled {
        tracing::info!(
            remote = config.parallel.url.as_deref().unwrap_or("local"),
            "Parallel mode enabled"
        );
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid listen address")?;

    // Create application state
    let app_state = AppState::new(config).context("Failed to initialize application state")?;
    let gate = app_state.gate().clone();

    let app = routes::router(app_state);

    tracing::info!("Partition Gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(gate))
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler; closes admission before draining
async fn shutdown_signal(gate: AdmissionGate) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }

    gate.begin_shutdown();
}
