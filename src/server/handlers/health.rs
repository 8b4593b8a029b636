use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::server::state::AppState;

/// Liveness/readiness probe: reports the number of discovered assets and
/// process uptime.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "assets": state.assets.len(),
        "uptime_s": state.started_at.elapsed().as_secs(),
    }))
}
