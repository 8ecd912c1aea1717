use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

// ─── Internal error type ─────────────────────────────────────────

/// Failures inside the background jobs (log writer, alerting, analysis).
/// None of these ever reach a request path: callers log and degrade.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream answered, but not with something we can use.
    #[error("unexpected response from {service}: {detail}")]
    UnexpectedResponse { service: &'static str, detail: String },
}

pub type MonitorResult<T> = Result<T, MonitorError>;

// ─── HTTP error type ─────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    /// No credential header on the request.
    Unauthorized,
    /// Credential present but wrong, or the server has no secret configured.
    Forbidden,
    NotFound(String),
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "missing metrics credential".to_string(),
            ),
            Self::Forbidden => (StatusCode::FORBIDDEN, "access denied".to_string()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = serde_json::json!({
            "error":  message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}
