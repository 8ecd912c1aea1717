//! Persisted performance log.
//!
//! The timing middleware hands each record to [`PerfLogSender::log`], which
//! uses a non-blocking `try_send`; a background [`PerfLogWriter`] appends one
//! redacted JSON object per line. The offline analyzer reads this file back.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::error::MonitorResult;
use crate::metrics::MetricRecord;
use crate::redaction::redact;

/// Entries are silently dropped when the channel is full.
pub const PERF_LOG_CHANNEL_CAPACITY: usize = 4_096;

/// `type` tag marking a completed-request performance entry.
pub const REQUEST_METRICS_TYPE: &str = "request_metrics";

/// One line of the performance log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerfLogEntry<M> {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub message: String,
    pub metric: M,
}

impl<M> PerfLogEntry<M> {
    pub fn request_completed(timestamp: DateTime<Utc>, metric: M) -> Self {
        Self {
            timestamp,
            level: "info".into(),
            entry_type: REQUEST_METRICS_TYPE.into(),
            message: "request completed".into(),
            metric,
        }
    }
}

/// Cloneable producer half, held by the timing middleware.
#[derive(Clone)]
pub struct PerfLogSender {
    tx: mpsc::Sender<Arc<MetricRecord>>,
}

impl PerfLogSender {
    pub fn log(&self, record: Arc<MetricRecord>) {
        if self.tx.try_send(record).is_err() {
            tracing::trace!("performance log channel full, entry dropped");
        }
    }
}

/// Background task that owns the log file.
pub struct PerfLogWriter {
    receiver: mpsc::Receiver<Arc<MetricRecord>>,
    path: PathBuf,
}

impl PerfLogWriter {
    pub fn new(path: impl Into<PathBuf>) -> (PerfLogSender, Self) {
        let (tx, receiver) = mpsc::channel(PERF_LOG_CHANNEL_CAPACITY);
        (
            PerfLogSender { tx },
            Self {
                receiver,
                path: path.into(),
            },
        )
    }

    /// Run until every sender is dropped. The file is opened on the first
    /// entry and reopened after a write error.
    pub async fn run(mut self) {
        let mut file: Option<File> = None;
        while let Some(record) = self.receiver.recv().await {
            if file.is_none() {
                match open_append(&self.path).await {
                    Ok(f) => file = Some(f),
                    Err(e) => {
                        tracing::warn!(
                            path = %self.path.display(),
                            error = %e,
                            "failed to open performance log"
                        );
                        continue;
                    }
                }
            }
            if let Some(f) = file.as_mut() {
                if let Err(e) = write_entry(f, &record).await {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "failed to write performance log entry"
                    );
                    file = None;
                }
            }
        }
        if let Some(mut f) = file {
            let _ = f.flush().await;
        }
        tracing::debug!("performance log writer stopped");
    }
}

async fn open_append(path: &Path) -> MonitorResult<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?)
}

/// Serialize, redact and write one line.
async fn write_entry(file: &mut File, record: &MetricRecord) -> MonitorResult<()> {
    let entry = PerfLogEntry::request_completed(record.timestamp, record);
    let mut line = serde_json::to_string(&redact(&serde_json::to_value(&entry)?))?;
    line.push('\n');
    file.write_all(line.as_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::record::tests::record;

    #[tokio::test]
    async fn writes_one_json_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/perf.log");

        let (sender, writer) = PerfLogWriter::new(&path);
        let handle = tokio::spawn(writer.run());

        sender.log(Arc::new(record("/a", 200, 5.0)));
        sender.log(Arc::new(record("/b", 500, 7.0)));
        drop(sender);
        handle.await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: PerfLogEntry<MetricRecord> = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.entry_type, REQUEST_METRICS_TYPE);
        assert_eq!(first.metric.route, "/a");
    }

    #[tokio::test]
    async fn entries_keep_user_id_and_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perf.log");
        let mut rec = record("/login", 200, 5.0);
        rec.user_id = Some("42".into());

        let (sender, writer) = PerfLogWriter::new(&path);
        let handle = tokio::spawn(writer.run());
        sender.log(Arc::new(rec));
        drop(sender);
        handle.await.unwrap();

        let line = tokio::fs::read_to_string(&path).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["metric"]["userId"], "42");
        assert_eq!(value["level"], "info");
        assert_eq!(value["message"], "request completed");
    }
}
