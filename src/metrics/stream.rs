use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::{Stream, StreamExt};

use super::buffer::WindowSummary;
use super::record::MetricRecord;
use crate::AppState;

const DEFAULT_WINDOW_HOURS: f64 = 1.0;

// ─── GET /metrics/summary?window=<hours> ─────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct SummaryQuery {
    /// Hours as free text so a malformed value falls back instead of rejecting.
    pub window: Option<String>,
}

impl SummaryQuery {
    pub fn window(&self) -> Duration {
        let hours = self
            .window
            .as_deref()
            .and_then(|w| w.trim().parse::<f64>().ok())
            .filter(|h| h.is_finite() && *h > 0.0)
            .unwrap_or(DEFAULT_WINDOW_HOURS);
        Duration::try_from_secs_f64(hours * 3600.0)
            .unwrap_or(Duration::from_secs(3600))
    }
}

pub async fn get_summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SummaryQuery>,
) -> Json<WindowSummary> {
    Json(state.buffer.get_summary(query.window()))
}

// ─── GET /metrics/health ─────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: &'static str,
    pub buffer_size: usize,
    pub capacity: usize,
    pub subscribers: usize,
    pub dropped_notifications: u64,
    pub timestamp: DateTime<Utc>,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    let buffer = &state.buffer;
    Json(HealthStatus {
        status: "operational",
        buffer_size: buffer.size(),
        capacity: buffer.capacity(),
        subscribers: buffer.subscriber_count(),
        dropped_notifications: buffer.dropped_notifications(),
        timestamp: Utc::now(),
    })
}

// ─── GET /metrics/live ───────────────────────────────────────────
/// Server-Sent Events endpoint.
/// Sends a `connected` event, then one `metric` event per record added to
/// the buffer. The subscription lives inside the stream, so the observer is
/// deregistered as soon as axum drops the stream on disconnect.

pub async fn live_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.buffer.subscribe();
    let guard = ConnectionLog::open(state.buffer.subscriber_count());

    let connected = serde_json::json!({
        "bufferSize": state.buffer.size(),
        "timestamp": Utc::now(),
    });
    let hello = tokio_stream::once(Ok(Event::default()
        .event("connected")
        .data(connected.to_string())));

    let updates = subscription.map(move |record| {
        let _alive = &guard;
        Ok(metric_event(&record))
    });

    Sse::new(hello.chain(updates)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn metric_event(record: &MetricRecord) -> Event {
    let json = serde_json::to_string(record).unwrap_or_default();
    Event::default().event("metric").data(json)
}

/// Logs connect/disconnect of one live observer.
struct ConnectionLog;

impl ConnectionLog {
    fn open(subscribers: usize) -> Self {
        tracing::info!(subscribers, "live metrics observer connected");
        Self
    }
}

impl Drop for ConnectionLog {
    fn drop(&mut self) {
        tracing::info!("live metrics observer disconnected");
    }
}
