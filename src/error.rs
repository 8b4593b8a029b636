//! Error taxonomy for the stream simulator and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LivesimError>;

/// Every way a request into the stream simulator can fail.
///
/// Each variant maps to exactly one HTTP status.
#[derive(Debug, Error)]
pub enum LivesimError {
    /// Asset, representation, init segment, media segment, sub-segment
    /// index, or subtitle language unknown.
    #[error("not found: {0}")]
    NotFound(String),

    /// Segment requested before its availability time. Carries the number
    /// of milliseconds the client is early by.
    #[error("{0}ms too early")]
    TooEarly(u64),

    /// Segment older than `timeShiftBufferDepth` (+ margin).
    #[error("gone: {0}")]
    Gone(String),

    /// A URL option failed to parse, or violated a cross-option invariant.
    #[error("bad option: {0}")]
    BadConfig(String),

    /// Malformed query parameter or unparsable segment identifier.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A configured `statuscode` cycle matched this request.
    #[error("triggered status {0}")]
    TriggeredStatus(u16),

    /// MP4 decode failure or a broken internal invariant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for LivesimError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            LivesimError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            LivesimError::TooEarly(delta_ms) => {
                (StatusCode::from_u16(425).unwrap(), format!("{delta_ms}ms too early"))
            }
            LivesimError::Gone(msg) => (StatusCode::GONE, msg.clone()),
            LivesimError::BadConfig(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            LivesimError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            LivesimError::TriggeredStatus(code) => (
                StatusCode::from_u16(*code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                format!("triggered status {code}"),
            ),
            LivesimError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };
        if status.is_server_error() {
            tracing::error!(%status, %body, "request failed");
        } else {
            tracing::debug!(%status, %body, "request rejected");
        }
        (status, body).into_response()
    }
}

impl From<std::io::Error> for LivesimError {
    fn from(e: std::io::Error) -> Self {
        LivesimError::Internal(e.to_string())
    }
}

impl From<quick_xml::DeError> for LivesimError {
    fn from(e: quick_xml::DeError) -> Self {
        LivesimError::Internal(format!("MPD parse error: {e}"))
    }
}

impl From<quick_xml::se::SeError> for LivesimError {
    fn from(e: quick_xml::se::SeError) -> Self {
        LivesimError::Internal(format!("MPD serialize error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn too_early_renders_exact_body() {
        let resp = LivesimError::TooEarly(500).into_response();
        assert_eq!(resp.status().as_u16(), 425);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"500ms too early");
    }

    #[tokio::test]
    async fn gone_maps_to_410() {
        let resp = LivesimError::Gone("too old".into()).into_response();
        assert_eq!(resp.status().as_u16(), 410);
    }

    #[tokio::test]
    async fn triggered_status_uses_configured_code() {
        let resp = LivesimError::TriggeredStatus(404).into_response();
        assert_eq!(resp.status().as_u16(), 404);
    }
}
