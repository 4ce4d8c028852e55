mod config;
mod feeds;
mod models;
mod stations;
mod web;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use config::Config;

/// Shared application state — immutable after startup.
pub struct AppState {
    pub config: Config,
    pub http: reqwest::Client,
    pub shutdown: CancellationToken,
}

#[tokio::main]
async fn main() {
    // Initialize tracing (structured logging)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "transit_board=info".parse().unwrap()),
        )
        .init();

    info!("Transit board service starting");

    // Find config file
    let config_path = find_config_path();
    info!("Config file: {}", config_path.display());

    let config = match Config::load(&config_path) {
        Ok(cfg) => {
            info!("Config loaded: listening on {}", cfg.server.bind_addr);
            cfg
        }
        Err(e) => {
            error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let http = match feeds::build_http_client() {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    let state = Arc::new(AppState {
        config,
        http,
        shutdown: CancellationToken::new(),
    });

    // Spawn web server task
    let web_state = Arc::clone(&state);
    let web_handle = tokio::spawn(web::server::run(web_state));

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    state.shutdown.cancel();
    let _ = web_handle.await;

    info!("Shutdown complete");
}

/// Find the config.json file (check CWD, then parent directory).
fn find_config_path() -> PathBuf {
    let candidates = [
        PathBuf::from("config.json"),
        PathBuf::from("../config.json"),
    ];
    for path in &candidates {
        if path.exists() {
            return path.clone();
        }
    }
    // Default even if it doesn't exist yet
    PathBuf::from("config.json")
}

/// Wait for SIGTERM or SIGINT (Ctrl-C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
