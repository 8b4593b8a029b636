use std::sync::Arc;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::asset::AssetIndex;
use crate::config::Config;
use crate::rate_limit::RateLimiter;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// The process-wide asset index, built once at startup.
    pub assets: AssetIndex,
    /// `None` disables the rate-limiting middleware.
    pub rate_limiter: Option<RateLimiter>,
    pub metrics_handle: Arc<PrometheusHandle>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config, assets: AssetIndex, metrics_handle: PrometheusHandle) -> Self {
        let rate_limiter = if config.rate_limit_rpm > 0 {
            Some(RateLimiter::new(config.rate_limit_rpm))
        } else {
            None
        };
        Self {
            config: Arc::new(config),
            assets,
            rate_limiter,
            metrics_handle: Arc::new(metrics_handle),
            started_at: Instant::now(),
        }
    }
}
