//! Router-level tests using tower::ServiceExt::oneshot.
//!
//! Exercises routing, middleware, and error-mapping without binding a TCP
//! listener or requiring real DASH assets on disk — the segment rewriting
//! and timing algorithms themselves are covered by the per-module unit
//! tests (`asset`, `timeline`, `mp4segment`, `audio`, `chunk`, `subtitles`).

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use livesim_rs::asset::AssetIndex;
use livesim_rs::config::Config;
use livesim_rs::metrics;
use livesim_rs::server::{build_router, state::AppState};
use tempfile::TempDir;
use tower::ServiceExt;

fn test_state(vod_root: &std::path::Path, rate_limit_rpm: u32) -> AppState {
    let config = Config {
        port: 0,
        base_url: "http://localhost:8080".to_string(),
        is_dev: true,
        vod_root: vod_root.to_path_buf(),
        rep_data_root: None,
        availability_margin_s: 10,
        rate_limit_rpm,
    };
    let assets = AssetIndex::discover(&config.vod_root, None).unwrap();
    AppState::new(config, assets, metrics::install())
}

#[tokio::test]
async fn health_returns_200_with_json() {
    let dir = TempDir::new().unwrap();
    let app = build_router(test_state(dir.path(), 0));

    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["assets"], 0);
}

#[tokio::test]
async fn metrics_endpoint_returns_200() {
    let dir = TempDir::new().unwrap();
    let app = build_router(test_state(dir.path(), 0));

    let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_asset_returns_404() {
    let dir = TempDir::new().unwrap();
    let app = build_router(test_state(dir.path(), 0));

    let req = Request::builder()
        .uri("/livesim2/testpic/stream.mpd")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unrecognized_route_returns_404() {
    let dir = TempDir::new().unwrap();
    let app = build_router(test_state(dir.path(), 0));

    let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bad_nowms_returns_400() {
    let dir = TempDir::new().unwrap();
    let app = build_router(test_state(dir.path(), 0));

    let req = Request::builder()
        .uri("/livesim2/testpic/stream.mpd?nowMS=not-a-number")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rate_limiter_blocks_after_limit() {
    let dir = TempDir::new().unwrap();
    let app = build_router(test_state(dir.path(), 3));

    for _ in 0..3 {
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
}
