//! Retrospective analysis over the persisted performance log.
//!
//! Works only from disk, never from the live buffer, so it sees a longer
//! history and survives restarts. The log file is opened read-only; running
//! the analysis twice over the same file yields the same statistics.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::anomaly::{detect, Finding};
use super::recommend::{Recommendations, Recommender};
use super::report;
use crate::config::AnalysisConfig;
use crate::error::MonitorResult;
use crate::metrics::percentiles::{distribution, summarize, DistBucket, RouteSummary};
use crate::metrics::MetricRecord;
use crate::perf_log::REQUEST_METRICS_TYPE;

/// Everything the rendered report is built from.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub generated_at: DateTime<Utc>,
    pub period_start: DateTime<Utc>,
    pub period_hours: f64,
    pub log_path: String,
    pub scan: ScanStats,
    pub total_requests: u64,
    pub routes: Vec<RouteSummary>,
    /// Highest p95 first.
    pub slowest: Vec<RouteSummary>,
    pub distribution: Vec<DistBucket>,
    pub bottlenecks: Vec<Finding>,
    pub recommendations: Recommendations,
    pub warnings: Vec<String>,
}

/// Line accounting for one pass over the log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStats {
    pub lines: u64,
    pub malformed: u64,
    /// Valid lines that are not request-performance entries.
    pub other_entries: u64,
    pub out_of_period: u64,
    pub accepted: u64,
}

/// Result of a scan: kept records plus accounting.
#[derive(Debug, Default)]
pub struct LogScan {
    pub records: Vec<MetricRecord>,
    pub stats: ScanStats,
}

pub struct OfflineTraceAnalyzer {
    log_path: PathBuf,
    reports_dir: PathBuf,
    period: Duration,
    top_n: usize,
    recommender: Recommender,
}

impl OfflineTraceAnalyzer {
    pub fn new(
        log_path: impl Into<PathBuf>,
        reports_dir: impl Into<PathBuf>,
        period: Duration,
        top_n: usize,
        recommender: Recommender,
    ) -> Self {
        Self {
            log_path: log_path.into(),
            reports_dir: reports_dir.into(),
            period,
            top_n,
            recommender,
        }
    }

    pub fn from_config(config: &AnalysisConfig, client: reqwest::Client) -> Self {
        Self::new(
            config.log_path.clone(),
            config.reports_dir.clone(),
            config.period,
            config.top_n,
            Recommender::from_config(config, client),
        )
    }

    /// Analyse the trailing period and persist the report.
    pub async fn run(&self) -> MonitorResult<(AnalysisReport, PathBuf)> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> MonitorResult<(AnalysisReport, PathBuf)> {
        let report = self.analyze_at(now).await;
        let path = report::write_report(&self.reports_dir, &report).await?;
        tracing::info!(
            path = %path.display(),
            requests = report.total_requests,
            routes = report.routes.len(),
            bottlenecks = report.bottlenecks.len(),
            "performance report written"
        );
        Ok((report, path))
    }

    /// Build the report without writing it.
    pub async fn analyze_at(&self, now: DateTime<Utc>) -> AnalysisReport {
        let since = chrono::Duration::from_std(self.period)
            .ok()
            .and_then(|p| now.checked_sub_signed(p))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut warnings = Vec::new();
        let scan = match scan_log(&self.log_path, since, now).await {
            Ok(scan) => scan,
            Err(e) => {
                let warning = if e.kind() == ErrorKind::NotFound {
                    format!("performance log not found at {}", self.log_path.display())
                } else {
                    format!("could not read performance log {}: {e}", self.log_path.display())
                };
                tracing::warn!("{warning}; producing an empty report");
                warnings.push(warning);
                LogScan::default()
            }
        };
        if scan.stats.malformed > 0 {
            tracing::debug!(malformed = scan.stats.malformed, "skipped malformed log lines");
        }

        let routes = summarize(&scan.records);
        let mut slowest = routes.clone();
        slowest.sort_by(|a, b| b.p95_duration_ms.total_cmp(&a.p95_duration_ms));
        slowest.truncate(self.top_n);

        let bottlenecks = detect(&routes);
        let recommendations = self.recommender.recommend(&slowest, &bottlenecks).await;

        AnalysisReport {
            generated_at: now,
            period_start: since,
            period_hours: self.period.as_secs_f64() / 3600.0,
            log_path: self.log_path.display().to_string(),
            total_requests: scan.records.len() as u64,
            distribution: distribution(&scan.records),
            scan: scan.stats,
            routes,
            slowest,
            bottlenecks,
            recommendations,
            warnings,
        }
    }
}

// ─── Log scanning ────────────────────────────────────────────────

#[derive(Deserialize)]
struct EntryHeader {
    #[serde(rename = "type")]
    entry_type: Option<String>,
    metric: Option<Value>,
}

enum LineOutcome {
    Accepted(MetricRecord),
    Malformed,
    Other,
    OutOfPeriod,
}

/// Read the log line by line, keeping performance entries in `[since, until]`.
/// Only a failure to open the file is an error; bad lines are counted and skipped.
pub async fn scan_log(
    path: &Path,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> std::io::Result<LogScan> {
    let file = tokio::fs::File::open(path).await?;
    let mut reader = BufReader::new(file);
    let mut scan = LogScan::default();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let Ok(line) = std::str::from_utf8(&buf) else {
            scan.stats.lines += 1;
            scan.stats.malformed += 1;
            continue;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        scan.stats.lines += 1;

        match classify_line(line, since, until) {
            LineOutcome::Accepted(record) => {
                scan.stats.accepted += 1;
                scan.records.push(record);
            }
            LineOutcome::Malformed => scan.stats.malformed += 1,
            LineOutcome::Other => scan.stats.other_entries += 1,
            LineOutcome::OutOfPeriod => scan.stats.out_of_period += 1,
        }
    }
    Ok(scan)
}

fn classify_line(line: &str, since: DateTime<Utc>, until: DateTime<Utc>) -> LineOutcome {
    let Ok(header) = serde_json::from_str::<EntryHeader>(line) else {
        return LineOutcome::Malformed;
    };
    if header.entry_type.as_deref() != Some(REQUEST_METRICS_TYPE) {
        return LineOutcome::Other;
    }
    let Some(Ok(record)) = header.metric.map(serde_json::from_value::<MetricRecord>) else {
        return LineOutcome::Malformed;
    };
    if record.timestamp < since || record.timestamp > until {
        return LineOutcome::OutOfPeriod;
    }
    LineOutcome::Accepted(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::recommend::RecommendationSource;
    use crate::metrics::record::tests::record;
    use crate::perf_log::PerfLogEntry;

    fn analyzer(log: &Path, reports: &Path) -> OfflineTraceAnalyzer {
        let recommender = Recommender::new(
            reqwest::Client::new(),
            None,
            "http://127.0.0.1:9/unused".into(),
            "m".into(),
        );
        OfflineTraceAnalyzer::new(log, reports, Duration::from_secs(24 * 3600), 5, recommender)
    }

    fn log_line(rec: &MetricRecord) -> String {
        serde_json::to_string(&PerfLogEntry::request_completed(rec.timestamp, rec)).unwrap()
    }

    #[tokio::test]
    async fn analyzes_log_and_skips_noise() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("perf.log");
        let now = Utc::now() + chrono::Duration::minutes(1);

        let mut old = record("/old", 200, 10.0);
        old.timestamp = now - chrono::Duration::hours(30);
        let mut lines = vec![
            log_line(&record("/api/jobs", 200, 100.0)),
            "{ not json".to_string(),
            r#"{"type":"startup","message":"server listening"}"#.to_string(),
            r#"{"type":"request_metrics","metric":{"route":"/broken"}}"#.to_string(),
            log_line(&old),
            String::new(),
        ];
        for _ in 0..19 {
            lines.push(log_line(&record("/api/jobs", 200, 100.0)));
        }
        lines.push(log_line(&record("/api/slow", 200, 900.0)));
        tokio::fs::write(&log, lines.join("\n")).await.unwrap();

        let report = analyzer(&log, dir.path()).analyze_at(now).await;

        assert_eq!(report.total_requests, 21);
        assert_eq!(report.scan.malformed, 2);
        assert_eq!(report.scan.other_entries, 1);
        assert_eq!(report.scan.out_of_period, 1);
        assert_eq!(report.routes.len(), 2);
        assert_eq!(report.slowest[0].route, "/api/slow");
        assert_eq!(report.bottlenecks.len(), 1);
        assert_eq!(report.bottlenecks[0].route, "/api/slow");
        assert_eq!(report.recommendations.source, RecommendationSource::Static);
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn invalid_utf8_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("perf.log");
        let mut bytes = vec![0xff, 0xfe, b'\n'];
        bytes.extend_from_slice(log_line(&record("/ok", 200, 1.0)).as_bytes());
        tokio::fs::write(&log, bytes).await.unwrap();

        let scan = scan_log(&log, DateTime::<Utc>::MIN_UTC, Utc::now()).await.unwrap();
        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.stats.malformed, 1);
    }

    #[tokio::test]
    async fn missing_log_yields_empty_report_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let reports = dir.path().join("reports");
        let analyzer = analyzer(&dir.path().join("absent.log"), &reports);

        let (report, path) = analyzer.run().await.unwrap();
        assert_eq!(report.total_requests, 0);
        assert!(report.routes.is_empty());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("not found"));
        assert!(path.starts_with(&reports));
        assert!(tokio::fs::metadata(&path).await.unwrap().is_file());
    }

    #[tokio::test]
    async fn rerunning_does_not_touch_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("perf.log");
        let content = format!("{}\n", log_line(&record("/a", 500, 3.0)));
        tokio::fs::write(&log, &content).await.unwrap();

        let analyzer = analyzer(&log, &dir.path().join("reports"));
        let (first, first_path) = analyzer.run().await.unwrap();
        let (second, second_path) = analyzer.run().await.unwrap();

        assert_eq!(first.routes, second.routes);
        assert_ne!(first_path, second_path);
        assert_eq!(tokio::fs::read_to_string(&log).await.unwrap(), content);
    }
}
