//! Everything that looks at records after the fact: threshold detection,
//! alerting, offline log analysis, and scheduled runs of both.

pub mod anomaly;
pub mod offline;
pub mod recommend;
pub mod report;
pub mod scheduler;

use std::time::Duration;

pub use anomaly::{AnomalyDetector, Finding};
pub use offline::{AnalysisReport, OfflineTraceAnalyzer};

/// Outbound calls (webhook, text generation) never hang a job for long.
const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared client for the alert webhook and the text-generation service.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(OUTBOUND_TIMEOUT)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to build HTTP client, using defaults");
            reqwest::Client::new()
        })
}
