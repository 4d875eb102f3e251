//! HTTP request handlers.

use super::AppState;
use crate::version::VersionInfo;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;

/// Returned by `/healthz/ready` while the checker is not accepting commands.
fn not_ready_status() -> StatusCode {
    StatusCode::from_u16(552).unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
}

// ============================================================================
// Probes
// ============================================================================

pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    match state.checker.healthy().await {
        Ok(true) => (StatusCode::OK, "OK\n"),
        Ok(false) => (StatusCode::INTERNAL_SERVER_ERROR, "Failure\n"),
        Err(e) => {
            tracing::warn!("Cannot read cluster health: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failure\n")
        }
    }
}

pub async fn handle_healthz() -> impl IntoResponse {
    "OK\n"
}

pub async fn handle_ready(State(state): State<AppState>) -> impl IntoResponse {
    if state.checker.ready().await {
        (StatusCode::OK, "OK\n")
    } else {
        (not_ready_status(), "Not ready\n")
    }
}

// ============================================================================
// API: Services
// ============================================================================

pub async fn handle_get_services(State(state): State<AppState>) -> impl IntoResponse {
    match state.checker.state().await {
        Ok(cluster) => Json(cluster).into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

pub async fn handle_get_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.checker.target(&name).await {
        Ok(Some(details)) => Json(details).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Service not found").into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct AddServiceRequest {
    pub name: String,
    pub url: String,
}

pub async fn handle_add_service(
    State(state): State<AppState>,
    Json(req): Json<AddServiceRequest>,
) -> impl IntoResponse {
    if req.name.is_empty() || req.url.is_empty() {
        return (StatusCode::BAD_REQUEST, "name and url are required").into_response();
    }

    state.checker.add(&req.name, &req.url).await;
    StatusCode::ACCEPTED.into_response()
}

pub async fn handle_delete_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    state.checker.delete(&name).await;
    StatusCode::ACCEPTED
}

// ============================================================================
// Build information
// ============================================================================

pub async fn handle_version() -> impl IntoResponse {
    Json(VersionInfo::current())
}
