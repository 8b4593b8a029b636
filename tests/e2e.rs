//! End-to-end tests: binds a real TCP listener and drives the full HTTP
//! pipeline, including the rate-limiting middleware and tracing layers that
//! only `axum::serve` exercises (as opposed to `tower::ServiceExt::oneshot`
//! in `tests/handlers.rs`).

use livesim_rs::asset::AssetIndex;
use livesim_rs::config::Config;
use livesim_rs::metrics;
use livesim_rs::server::{self, state::AppState};
use std::net::SocketAddr;
use tempfile::TempDir;

async fn start_test_server(vod_root: &std::path::Path) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test server");
    let addr = listener.local_addr().unwrap();

    let config = Config {
        port: addr.port(),
        base_url: format!("http://{addr}"),
        is_dev: true,
        vod_root: vod_root.to_path_buf(),
        rep_data_root: None,
        availability_margin_s: 10,
        rate_limit_rpm: 0,
    };
    let assets = AssetIndex::discover(&config.vod_root, None).unwrap();
    let state = AppState::new(config, assets, metrics::install());
    let app = server::build_router(state);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

#[tokio::test]
async fn health_check_over_real_http() {
    let dir = TempDir::new().unwrap();
    let addr = start_test_server(dir.path()).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn unknown_asset_returns_404_over_real_http() {
    let dir = TempDir::new().unwrap();
    let addr = start_test_server(dir.path()).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{addr}/livesim2/testpic/stream.mpd"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn metrics_endpoint_over_real_http() {
    let dir = TempDir::new().unwrap();
    let addr = start_test_server(dir.path()).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("http://{addr}/metrics")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
}
