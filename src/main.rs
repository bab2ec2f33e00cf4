//! Process entry point: parse configuration, wire the component graph,
//! and serve the HTTP edge (`spec.md` §6 "Exit codes", §4.8).

use std::process::ExitCode;

use aria_gateway::config::{Config, ConfigError};
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const EXIT_OK: u8 = 0;
const EXIT_INVALID_CONFIG: u8 = 64;
const EXIT_WORKER_STARTUP_FAILURE: u8 = 70;

fn main() -> ExitCode {
    init_tracing();

    let config = match Config::load() {
        Ok(config) => config,
        Err(ConfigError::Invalid(message)) => {
            eprintln!("invalid configuration: {message}");
            return ExitCode::from(EXIT_INVALID_CONFIG);
        }
    };

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to start tokio runtime")
        .block_on(run(config))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

async fn run(config: Config) -> ExitCode {
    let host = config.backend_host.clone();
    let port = config.backend_port;

    let app = aria_gateway::build_app(config);

    let listener = match TcpListener::bind((host.as_str(), port)).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, host, port, "failed to bind HTTP listener");
            return ExitCode::from(EXIT_WORKER_STARTUP_FAILURE);
        }
    };

    tracing::info!(host, port, "aria gateway listening");

    let serve_result = axum::serve(listener, app.router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    app.progress_forwarder.abort();

    match serve_result {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(e) => {
            tracing::error!(error = %e, "HTTP server exited with an error");
            ExitCode::from(EXIT_WORKER_STARTUP_FAILURE)
        }
    }
}

/// Waits for SIGINT (Ctrl-C) or, on unix, SIGTERM so orchestrated shutdowns
/// (container stop, systemd) drain in-flight requests the same as a local
/// Ctrl-C.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received, draining in-flight requests");
}
