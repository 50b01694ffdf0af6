use axum::{extract::State, http::StatusCode, Json};

use crate::api::state::AppState;
use crate::services::{HealthResponse, HealthStatus};

/// GET /health -- component health with live entity counts
pub async fn health_handler(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<HealthResponse>)> {
    let health = state.health.get_health().await;
    if health.status == HealthStatus::Unhealthy {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(health)))
    } else {
        Ok(Json(health))
    }
}

/// GET /healthz -- liveness only
pub async fn liveness_handler() -> &'static str {
    "ok"
}
