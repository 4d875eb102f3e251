//! Web server module.

mod handlers;

pub use handlers::*;

use crate::checker::Checker;
use crate::config::ServerConfig;

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use std::future::Future;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub checker: Checker,
}

/// Web front-end for the checker.
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, checker: Checker) -> Self {
        Self {
            config,
            state: AppState { checker },
        }
    }

    /// Serve until `shutdown` resolves, then stop the checker and return.
    pub async fn start<F>(
        &self,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.bind_address();
        let router = routes(self.state.clone());

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("Web server listening on {}", listener.local_addr()?);

        let checker = self.state.checker.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!("Stopping server");
                checker.stop().await;
            })
            .await?;

        Ok(())
    }
}

/// Build the router with all routes.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/status", get(handlers::handle_status))
        .route("/healthz", get(handlers::handle_healthz))
        .route("/healthz/ready", get(handlers::handle_ready))
        .route(
            "/services",
            get(handlers::handle_get_services).post(handlers::handle_add_service),
        )
        .route(
            "/services/{name}",
            get(handlers::handle_get_service).delete(handlers::handle_delete_service),
        )
        .route("/version", get(handlers::handle_version))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(64 * 1024))
        .with_state(state)
}
