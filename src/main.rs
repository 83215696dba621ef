use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use classkeeper::config::Config;
use classkeeper::AppState;

#[derive(Parser, Debug)]
#[command(name = "classkeeper")]
#[command(author, version, about = "Multi-tenant school management backend", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Cli::parse().config;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_filter())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting classkeeper v{}", env!("CARGO_PKG_VERSION"));

    if config.server.is_production() && config.auth.uses_default_secret() {
        tracing::warn!("JWT_SECRET is the built-in default; set a real secret for production");
    }

    let db = classkeeper::db::init(&config.database).await?;

    let state = Arc::new(AppState::new(config.clone(), db));
    let app = classkeeper::api::create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("API server listening on http://{}", addr);
    if config.server.demo_mode {
        tracing::info!("Demo mode enabled");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

    tracing::info!("Shutdown signal received");
}
