use axum::{
    async_trait,
    body::{Body, BodyDataStream, Bytes, HttpBody},
    extract::{FromRequestParts, MatchedPath, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio_stream::Stream;

use crate::metrics::{DbTimingsSummary, MetricRecord};
use crate::AppState;

/// Echoed on every recorded response; also read from the request.
pub const CORRELATION_HEADER: &str = "x-correlation-id";
const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_CORRELATION_ID_LEN: usize = 128;

/// Route label for requests that matched no route.
pub const UNMATCHED_ROUTE: &str = "unmatched";

/// Identity of the authenticated caller.
///
/// The surrounding application's auth layer puts this in the request
/// extensions (or a handler puts it in the response extensions); the timing
/// middleware copies it into the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// Per-request side channel for database sub-timings.
///
/// The timing middleware inserts one into the request extensions; handlers
/// take it as an extractor and append samples. Outside a recorded request the
/// extractor yields a detached handle whose samples go nowhere.
#[derive(Debug, Clone, Default)]
pub struct DbTimings(Arc<Mutex<Vec<f64>>>);

impl DbTimings {
    pub fn record_ms(&self, ms: f64) {
        self.0.lock().push(ms);
    }

    pub fn record(&self, elapsed: Duration) {
        self.record_ms(elapsed.as_secs_f64() * 1000.0);
    }

    /// Await `fut` and record how long it took.
    pub async fn time<F: Future>(&self, fut: F) -> F::Output {
        let start = Instant::now();
        let out = fut.await;
        self.record(start.elapsed());
        out
    }

    fn take(&self) -> Vec<f64> {
        std::mem::take(&mut *self.0.lock())
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for DbTimings
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<DbTimings>().cloned().unwrap_or_default())
    }
}

/// Middleware that turns every sampled request into one [`MetricRecord`]:
///
///   * times the request until the response body has been fully sent
///   * collects database sub-timings through [`DbTimings`]
///   * pushes the record into the buffer and the persisted log
///   * echoes the correlation id as `x-correlation-id`
///
/// Disabled or unsampled requests pass straight through.
pub async fn timing_middleware(
    State(state): State<Arc<AppState>>,
    matched_path: Option<MatchedPath>,
    mut req: Request,
    next: Next,
) -> Response {
    let config = &state.config;
    if !config.enabled || !should_sample(config.sample_rate, rand::random::<f64>()) {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let route = matched_path
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_owned());
    let correlation_id = correlation_id(req.headers());
    let request_bytes = content_length(req.headers());
    let mut user_id = req
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|u| u.0.clone());

    let db_timings = DbTimings::default();
    req.extensions_mut().insert(db_timings.clone());

    let start = Instant::now();
    let mut response = next.run(req).await;

    if user_id.is_none() {
        user_id = response
            .extensions()
            .get::<AuthenticatedUser>()
            .map(|u| u.0.clone());
    }
    let exact_len = response.body().size_hint().exact();
    let response_bytes = content_length(response.headers()).or(exact_len);

    if let Ok(val) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(CORRELATION_HEADER, val);
    }

    let pending = PendingRecord {
        state: state.clone(),
        start,
        db_timings,
        record: MetricRecord {
            timestamp: Utc::now(),
            correlation_id,
            method,
            route,
            status_code: response.status().as_u16(),
            duration_ms: 0.0,
            request_bytes,
            response_bytes,
            user_id,
            db: DbTimingsSummary::default(),
        },
    };

    if exact_len == Some(0) {
        pending.finish();
        return response;
    }

    // Keep the framing the original body would have had.
    if let Some(len) = exact_len {
        if !response.headers().contains_key(header::CONTENT_LENGTH) {
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(len));
        }
    }
    response.map(|body| {
        Body::from_stream(TimedBody {
            inner: body.into_data_stream(),
            pending: Some(pending),
        })
    })
}

/// A record waiting for its response body to finish.
struct PendingRecord {
    state: Arc<AppState>,
    start: Instant,
    db_timings: DbTimings,
    record: MetricRecord,
}

impl PendingRecord {
    fn finish(self) {
        let Self {
            state,
            start,
            db_timings,
            mut record,
        } = self;
        record.duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        record.timestamp = Utc::now();
        record.db = DbTimingsSummary::from_samples(db_timings.take());

        tracing::debug!(
            status = record.status_code,
            method = %record.method,
            route = %record.route,
            duration_ms = record.duration_ms,
            db_ms = record.db_total_ms(),
            correlation_id = %record.correlation_id,
            "request recorded"
        );

        let record = state.buffer.add(record);
        if let Some(log) = &state.perf_log {
            log.log(record);
        }
    }
}

/// Response body that completes its [`PendingRecord`] at end of stream, on a
/// body error, or when dropped early (client gone).
struct TimedBody {
    inner: BodyDataStream,
    pending: Option<PendingRecord>,
}

impl Stream for TimedBody {
    type Item = Result<Bytes, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = Pin::new(&mut self.inner).poll_next(cx);
        if matches!(poll, Poll::Ready(None) | Poll::Ready(Some(Err(_)))) {
            if let Some(pending) = self.pending.take() {
                pending.finish();
            }
        }
        poll
    }
}

impl Drop for TimedBody {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.finish();
        }
    }
}

/// A draw `u` in `[0, 1)` passes when `u < rate`: rate 0 never records,
/// rate 1 always does.
pub fn should_sample(rate: f64, draw: f64) -> bool {
    draw < rate
}

fn correlation_id(headers: &HeaderMap) -> String {
    [CORRELATION_HEADER, REQUEST_ID_HEADER]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|v| v.to_str().ok())
        .map(str::trim)
        .find(|v| !v.is_empty() && v.len() <= MAX_CORRELATION_ID_LEN)
        .map(str::to_owned)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}
