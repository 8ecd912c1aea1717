//! Threshold-based bottleneck detection over route summaries.

use chrono::Utc;
use serde::Serialize;

use crate::config::AlertConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::metrics::RouteSummary;

pub const SLOW_P95_MS: f64 = 500.0;
pub const DB_TIME_PERCENT: f64 = 50.0;
pub const ERROR_RATE_PERCENT: f64 = 5.0;
pub const LARGE_RESPONSE_BYTES: f64 = 1_048_576.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    High,
    Medium,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckKind {
    SlowResponse,
    ExcessiveDbTime,
    HighErrorRate,
    LargeResponse,
}

impl BottleneckKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SlowResponse => "slow_response",
            Self::ExcessiveDbTime => "excessive_db_time",
            Self::HighErrorRate => "high_error_rate",
            Self::LargeResponse => "large_response",
        }
    }
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
        }
    }
}

/// One route breaking one threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub route: String,
    #[serde(rename = "type")]
    pub kind: BottleneckKind,
    pub severity: Severity,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
}

/// Apply every rule to every route. Rules are independent, so one route can
/// produce up to four findings.
pub fn detect(summaries: &[RouteSummary]) -> Vec<Finding> {
    let mut findings = Vec::new();
    for s in summaries {
        if s.p95_duration_ms > SLOW_P95_MS {
            findings.push(Finding {
                route: s.route.clone(),
                kind: BottleneckKind::SlowResponse,
                severity: Severity::High,
                value: s.p95_duration_ms,
                threshold: SLOW_P95_MS,
                message: format!(
                    "p95 response time {:.1}ms exceeds {SLOW_P95_MS}ms",
                    s.p95_duration_ms
                ),
            });
        }
        if s.db_time_percent > DB_TIME_PERCENT {
            findings.push(Finding {
                route: s.route.clone(),
                kind: BottleneckKind::ExcessiveDbTime,
                severity: Severity::Medium,
                value: s.db_time_percent,
                threshold: DB_TIME_PERCENT,
                message: format!(
                    "database time is {:.1}% of request time (limit {DB_TIME_PERCENT}%)",
                    s.db_time_percent
                ),
            });
        }
        let error_rate = s.error_rate();
        if error_rate > ERROR_RATE_PERCENT {
            findings.push(Finding {
                route: s.route.clone(),
                kind: BottleneckKind::HighErrorRate,
                severity: Severity::High,
                value: error_rate,
                threshold: ERROR_RATE_PERCENT,
                message: format!(
                    "error rate {error_rate:.1}% exceeds {ERROR_RATE_PERCENT}% ({} of {} requests)",
                    s.error_count, s.count
                ),
            });
        }
        if s.avg_response_bytes > LARGE_RESPONSE_BYTES {
            findings.push(Finding {
                route: s.route.clone(),
                kind: BottleneckKind::LargeResponse,
                severity: Severity::Medium,
                value: s.avg_response_bytes,
                threshold: LARGE_RESPONSE_BYTES,
                message: format!(
                    "average response size {:.2} MiB exceeds 1 MiB",
                    s.avg_response_bytes / LARGE_RESPONSE_BYTES
                ),
            });
        }
    }
    findings
}

// ─── Detector with optional alerting ─────────────────────────────

pub struct AnomalyDetector {
    dispatcher: Option<AlertDispatcher>,
}

impl AnomalyDetector {
    pub fn new(dispatcher: Option<AlertDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Alerting is active only when enabled *and* a webhook URL is set.
    pub fn from_config(config: &AlertConfig, client: reqwest::Client) -> Self {
        let dispatcher = match (config.enabled, &config.webhook_url) {
            (true, Some(url)) => Some(AlertDispatcher::new(client, url.clone())),
            (true, None) => {
                tracing::warn!("alerting enabled but PERF_ALERT_WEBHOOK_URL is not set");
                None
            }
            _ => None,
        };
        Self::new(dispatcher)
    }

    /// Detect, log, and fire off an alert in the background. The returned
    /// findings never depend on whether the alert went out.
    pub fn run(&self, summaries: &[RouteSummary]) -> Vec<Finding> {
        let findings = detect(summaries);
        for f in &findings {
            tracing::warn!(
                route = %f.route,
                kind = f.kind.as_str(),
                severity = f.severity.as_str(),
                value = f.value,
                "{}",
                f.message
            );
        }

        if findings.is_empty() {
            return findings;
        }
        if let Some(dispatcher) = &self.dispatcher {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let dispatcher = dispatcher.clone();
                    let payload = findings.clone();
                    handle.spawn(async move {
                        if let Err(e) = dispatcher.dispatch(&payload).await {
                            tracing::warn!(error = %e, "failed to dispatch performance alert");
                        }
                    });
                }
                Err(_) => tracing::warn!("no async runtime; performance alert not sent"),
            }
        }
        findings
    }
}

/// Posts findings as JSON to an external webhook.
#[derive(Clone)]
pub struct AlertDispatcher {
    client: reqwest::Client,
    webhook_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AlertPayload<'a> {
    source: &'static str,
    generated_at: chrono::DateTime<Utc>,
    summary: String,
    findings: &'a [Finding],
}

impl AlertDispatcher {
    pub fn new(client: reqwest::Client, webhook_url: String) -> Self {
        Self {
            client,
            webhook_url,
        }
    }

    pub async fn dispatch(&self, findings: &[Finding]) -> MonitorResult<()> {
        let high = findings
            .iter()
            .filter(|f| f.severity == Severity::High)
            .count();
        let payload = AlertPayload {
            source: "request-perf-monitor",
            generated_at: Utc::now(),
            summary: format!(
                "{} performance bottleneck(s) detected, {high} high severity",
                findings.len()
            ),
            findings,
        };

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MonitorError::UnexpectedResponse {
                service: "alert webhook",
                detail: format!("status {}", response.status()),
            });
        }
        tracing::info!(findings = findings.len(), "performance alert dispatched");
        Ok(())
    }
}
