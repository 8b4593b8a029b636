//! Request metrics, built on the `metrics`/`metrics-exporter-prometheus`
//! crates. Ambient infrastructure, not a user-facing feature.

use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// The kind of content a request resolved to, used as the `kind` label.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    Mpd,
    Init,
    Segment,
    Chunk,
    Subtitle,
}

impl RequestKind {
    fn as_str(self) -> &'static str {
        match self {
            RequestKind::Mpd => "mpd",
            RequestKind::Init => "init",
            RequestKind::Segment => "segment",
            RequestKind::Chunk => "chunk",
            RequestKind::Subtitle => "subtitle",
        }
    }
}

/// Install the process-wide Prometheus recorder and return a handle whose
/// `render()` produces the scrape body for a `/metrics` endpoint.
pub fn install() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder")
}

pub fn record_request(kind: RequestKind, status: u16) {
    counter!("livesim_requests_total", "kind" => kind.as_str(), "status" => status.to_string())
        .increment(1);
}

pub fn record_duration(kind: RequestKind, elapsed: Duration) {
    histogram!("livesim_request_duration_seconds", "kind" => kind.as_str())
        .record(elapsed.as_secs_f64());
}

pub fn record_chunk_delay(delay_ms: i64) {
    histogram!("livesim_chunk_schedule_delay_ms").record(delay_ms as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_kind_labels_are_stable() {
        assert_eq!(RequestKind::Mpd.as_str(), "mpd");
        assert_eq!(RequestKind::Chunk.as_str(), "chunk");
    }
}
