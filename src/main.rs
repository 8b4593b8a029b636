use clap::Parser;
use tracing::{error, info};

use livesim_rs::asset::AssetIndex;
use livesim_rs::config::{Args, Config};
use livesim_rs::metrics;
use livesim_rs::server::{self, state::AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_args(Args::parse())?;
    info!(vod_root = %config.vod_root.display(), port = config.port, "starting livesim-rs");

    let metrics_handle = metrics::install();

    let assets = AssetIndex::discover(&config.vod_root, config.rep_data_root.as_deref())?;
    info!(assets = assets.len(), "asset discovery complete");

    let state = AppState::new(config.clone(), assets, metrics_handle);

    if let Err(e) = server::start(config, state).await {
        error!("server exited with error: {}", e);
        return Err(e);
    }

    Ok(())
}
