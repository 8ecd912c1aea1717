use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::error::ApiError;
use crate::AppState;

/// Header carrying the shared secret for `/metrics/*`.
pub const METRICS_KEY_HEADER: &str = "x-metrics-key";

/// Rejects the request before any handler (and so any buffer access) runs
/// unless it carries the configured shared secret.
///
/// Accepts either `x-metrics-key: <secret>` or `Authorization: Bearer <secret>`.
pub async fn metrics_auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    check_credential(state.config.api_key.as_deref(), request.headers())?;
    Ok(next.run(request).await)
}

pub fn check_credential(expected: Option<&str>, headers: &HeaderMap) -> Result<(), ApiError> {
    let presented = presented_credential(headers).ok_or(ApiError::Unauthorized)?;

    let Some(expected) = expected else {
        tracing::warn!("metrics endpoint called but PERF_METRICS_API_KEY is not configured");
        return Err(ApiError::Forbidden);
    };

    if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        tracing::debug!("metrics credential mismatch");
        Err(ApiError::Forbidden)
    }
}

fn presented_credential(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers.get(METRICS_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(key);
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn missing_header_is_unauthorized() {
        let result = check_credential(Some("k"), &headers(&[]));
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }

    #[test]
    fn wrong_key_is_forbidden() {
        let result = check_credential(Some("k"), &headers(&[(METRICS_KEY_HEADER, "nope")]));
        assert!(matches!(result, Err(ApiError::Forbidden)));
    }

    #[test]
    fn unconfigured_secret_denies_everyone() {
        let result = check_credential(None, &headers(&[(METRICS_KEY_HEADER, "anything")]));
        assert!(matches!(result, Err(ApiError::Forbidden)));
    }

    #[test]
    fn accepts_header_or_bearer() {
        assert!(check_credential(Some("k"), &headers(&[(METRICS_KEY_HEADER, "k")])).is_ok());
        assert!(check_credential(Some("k"), &headers(&[("authorization", "Bearer k")])).is_ok());
        assert!(matches!(
            check_credential(Some("k"), &headers(&[("authorization", "Basic k")])),
            Err(ApiError::Unauthorized)
        ));
    }
}
