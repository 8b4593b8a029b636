use axum::extract::State;
use axum::response::IntoResponse;

use crate::server::state::AppState;

/// Prometheus scrape endpoint.
pub async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics_handle.render()
}
