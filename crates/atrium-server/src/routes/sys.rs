//! System routes: `/health`.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use atrium_core::gateway::Connection;

use crate::error::AppError;
use crate::state::AppState;
use crate::ui::VERSION;

/// Build the system router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

/// Response body for `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Whether forgotten-password mail is configured.
    pub recovery_enabled: bool,
}

/// Health check: the directory must be readable.
async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, AppError> {
    let conn = Connection::guest(Arc::clone(&state.server));
    conn.directory().list_groups().await?;
    Ok(Json(HealthResponse {
        status: "ok",
        version: VERSION,
        recovery_enabled: state.server.recovery().is_enabled(),
    }))
}
