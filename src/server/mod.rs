pub mod handlers;
pub mod state;

use axum::{middleware, routing::get, Router};
use state::AppState;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::rate_limit::rate_limit_middleware;

/// Build the router: `/health`, `/metrics`, and the `/livesim2/...` live
/// streaming namespace, with tracing, CORS, and optional rate limiting
/// applied.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::health::health_check))
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::metrics_endpoint))
        .route("/livesim2/{*rest}", get(handlers::livesim::serve))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the Axum HTTP server.
pub async fn start(config: Config, state: AppState) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("0.0.0.0:{}", config.port);
    let app = build_router(state);

    let listener = match tokio::net::TcpListener::bind(addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            return Err(e.into());
        }
    };

    info!("server listening on http://{}", addr);

    if let Err(e) = axum::serve(listener, app).await {
        error!("server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
