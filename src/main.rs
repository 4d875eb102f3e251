//! clusterpulse - Cluster Health Check
//!
//! Probes a set of HTTP services and reports the cluster as healthy while
//! enough of them pass their health checks.

mod checker;
mod config;
mod logging;
mod probe;
mod version;
mod web;

use checker::Checker;
use config::ServerConfig;
use version::VersionInfo;
use web::Server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load configuration
    let cfg = match ServerConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("clusterpulse: {}", e);
            std::process::exit(2);
        }
    };

    // Initialize logging
    logging::init(cfg.log_preset)?;
    tracing::info!("Starting clusterpulse ({})", VersionInfo::current());
    tracing::info!(
        cluster = %cfg.cluster_id,
        interval = ?cfg.interval,
        success_threshold = cfg.success_threshold,
        failure_threshold = cfg.failure_threshold,
        state_threshold = cfg.state_threshold,
        "Configuration loaded"
    );

    // Start checker
    let checker = Checker::run(cfg.checker_config()).map_err(|e| {
        tracing::error!("Failed to start checker: {}", e);
        e
    })?;

    // Start web server
    let server = Server::new(cfg, checker);
    server.start(shutdown_signal()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
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
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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
