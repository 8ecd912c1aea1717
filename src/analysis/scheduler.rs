//! Periodic background jobs: live anomaly checks and offline analysis.
//!
//! Both loops skip the interval's immediate first tick, so nothing runs on an
//! empty buffer at startup. Failures are logged and the loop carries on.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::interval;

use super::anomaly::{AnomalyDetector, Finding};
use super::offline::OfflineTraceAnalyzer;
use crate::metrics::MetricsBuffer;
use crate::AppState;

/// Start whichever jobs the configuration enables.
pub fn spawn_jobs(state: &AppState, client: reqwest::Client) -> Vec<JoinHandle<()>> {
    let config = &state.config;
    let mut handles = Vec::new();

    if config.alerts.enabled {
        let detector = AnomalyDetector::from_config(&config.alerts, client.clone());
        handles.push(tokio::spawn(run_anomaly_loop(
            state.buffer.clone(),
            detector,
            config.alerts.interval,
            config.alerts.window,
        )));
        tracing::info!(
            interval_secs = config.alerts.interval.as_secs(),
            "anomaly detection scheduled"
        );
    }

    if config.analysis.enabled {
        let analyzer = OfflineTraceAnalyzer::from_config(&config.analysis, client);
        handles.push(tokio::spawn(run_analysis_loop(
            analyzer,
            config.analysis.interval,
        )));
        tracing::info!(
            interval_secs = config.analysis.interval.as_secs(),
            log = %config.analysis.log_path.display(),
            "offline analysis scheduled"
        );
    }

    handles
}

async fn run_anomaly_loop(
    buffer: Arc<MetricsBuffer>,
    detector: AnomalyDetector,
    every: Duration,
    window: Duration,
) {
    let mut ticker = interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let findings = check_buffer(&buffer, &detector, window);
        tracing::debug!(findings = findings.len(), "anomaly check complete");
    }
}

/// One detection pass over the buffer's trailing `window`.
pub fn check_buffer(
    buffer: &MetricsBuffer,
    detector: &AnomalyDetector,
    window: Duration,
) -> Vec<Finding> {
    let summary = buffer.get_summary(window);
    detector.run(&summary.routes)
}

async fn run_analysis_loop(analyzer: OfflineTraceAnalyzer, every: Duration) {
    let mut ticker = interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(e) = analyzer.run().await {
            tracing::error!(error = %e, "offline performance analysis failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::anomaly::BottleneckKind;
    use crate::config::MonitorConfig;
    use crate::metrics::record::tests::{record, record_aged};

    #[test]
    fn check_uses_only_the_trailing_window() {
        let buffer = MetricsBuffer::new(16, 4);
        buffer.add(record_aged("/old", chrono::Duration::hours(3)));
        buffer.add(record("/fresh", 500, 20.0));
        let detector = AnomalyDetector::new(None);

        let findings = check_buffer(&buffer, &detector, Duration::from_secs(3600));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].route, "/fresh");
        assert_eq!(findings[0].kind, BottleneckKind::HighErrorRate);
    }

    #[tokio::test]
    async fn nothing_spawned_when_jobs_disabled() {
        let state = AppState::new(MonitorConfig::default(), None);
        assert!(spawn_jobs(&state, reqwest::Client::new()).is_empty());
    }

    #[tokio::test]
    async fn enabled_jobs_are_spawned() {
        let mut config = MonitorConfig::default();
        config.alerts.enabled = true;
        config.analysis.enabled = true;
        let state = AppState::new(config, None);

        let handles = spawn_jobs(&state, reqwest::Client::new());
        assert_eq!(handles.len(), 2);
        for h in handles {
            h.abort();
        }
    }
}
