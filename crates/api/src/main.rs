use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cmctl_supervisor::{RestartConfig, RestartCoordinator, StatusPoller};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cmctl_api::config::ServerConfig;
use cmctl_api::router::build_app_router;
use cmctl_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cmctl_api=debug,cmctl_supervisor=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let restart_config = RestartConfig::from_env().expect("Invalid restart configuration");
    tracing::info!(
        restart = %restart_config.restart_command,
        fallback = %restart_config.fallback_restart_command,
        status = %restart_config.status_command,
        "Loaded restart configuration"
    );

    warn_if_not_root();

    // --- Restart coordinator ---
    let coordinator = Arc::new(RestartCoordinator::from_config(&restart_config));
    let status_probe = Arc::new(StatusPoller::new(
        restart_config.status_spec(),
        restart_config.worker_process_name.clone(),
        restart_config.command_timeout,
    ));

    // --- App state ---
    let shutdown = CancellationToken::new();
    let state = AppState {
        config: Arc::new(config.clone()),
        coordinator: Arc::clone(&coordinator),
        status_probe,
        shutdown: shutdown.clone(),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    let signal_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Close open event streams so connections can drain.
            signal_shutdown.cancel();
        })
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    let timeout = Duration::from_secs(config.shutdown_timeout_secs);
    if coordinator.shutdown(timeout).await {
        tracing::info!("Restart coordinator idle");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Restart, reload and journal commands generally need root.
#[cfg(unix)]
fn warn_if_not_root() {
    // Safety: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        tracing::warn!(euid, "Not running as root; restart commands will likely fail");
    }
}

#[cfg(not(unix))]
fn warn_if_not_root() {}
