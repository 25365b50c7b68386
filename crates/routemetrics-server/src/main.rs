//! routemetrics demo server.
//!
//! - Config: `routemetrics.yaml` (override with `ROUTEMETRICS_CONFIG`)
//! - Routes: `/healthz`, `/v1/users/:id`, plus the configured scrape endpoint
//! - Graceful shutdown on Ctrl+C / SIGTERM

use std::process::ExitCode;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use routemetrics_core::RouteMetricsError;
use routemetrics_server::{app_state, config, router};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, kind = e.kind().as_str(), "server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> routemetrics_core::Result<()> {
    let path =
        std::env::var("ROUTEMETRICS_CONFIG").unwrap_or_else(|_| "routemetrics.yaml".into());
    let cfg = config::load_from_file(&path)?;
    let listen = cfg.server.listen_addr()?;

    // Default process-wide registry at the outermost composition point.
    let state = app_state::AppState::new(cfg, None)?;
    let app = router::build_router(state);

    tracing::info!(%listen, "routemetrics-server starting");
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| RouteMetricsError::Internal(format!("bind {listen}: {e}")))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| RouteMetricsError::Internal(format!("server: {e}")))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
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
    tracing::info!("signal received, starting graceful shutdown");
}
