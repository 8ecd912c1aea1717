//! Request-performance observability for an axum service.
//!
//! ```text
//!   request ──▶ middleware::timing ──▶ MetricsBuffer (ring) ──▶ /metrics/summary
//!                      │                      └──────────────▶ /metrics/live (SSE)
//!                      └──▶ perf_log (JSON lines) ──▶ analysis::offline ──▶ reports/
//!
//!   analysis::scheduler ──▶ analysis::anomaly ──▶ alert webhook
//! ```

use std::sync::Arc;

pub mod analysis;
pub mod config;
pub mod demo;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod perf_log;
pub mod redaction;
pub mod server;

pub use config::MonitorConfig;
pub use metrics::{MetricRecord, MetricsBuffer};

/// Shared state available to the middleware and every handler via
/// `State<Arc<AppState>>`.
pub struct AppState {
    /// Read once at startup.
    pub config: Arc<MonitorConfig>,

    /// Ring of recent records; the timing middleware writes, queries read.
    pub buffer: Arc<MetricsBuffer>,

    /// Producer half of the persisted performance log, when one is running.
    pub perf_log: Option<perf_log::PerfLogSender>,
}

impl AppState {
    pub fn new(config: MonitorConfig, perf_log: Option<perf_log::PerfLogSender>) -> Self {
        let buffer = Arc::new(MetricsBuffer::new(
            config.buffer_capacity,
            config.live_queue_capacity,
        ));
        Self {
            config: Arc::new(config),
            buffer,
            perf_log,
        }
    }
}
