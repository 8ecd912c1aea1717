use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One performance observation for a single completed request.
///
/// Built once by the timing middleware and never mutated afterwards; the
/// buffer and every live observer share it through an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "WireRecord")]
pub struct MetricRecord {
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    pub method: String,
    /// Route template, e.g. "/api/jobs/:id".
    pub route: String,
    pub status_code: u16,
    pub duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub db: DbTimingsSummary,
}

impl MetricRecord {
    /// `true` for any status in `[200, 400)`.
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status_code)
    }

    pub fn db_total_ms(&self) -> Option<f64> {
        self.db.total_ms
    }
}

/// Sanitised database sub-timings.
///
/// The only ways to build one filter out anything that is not a finite,
/// non-negative number, so `total_ms` is present exactly when `timings_ms`
/// is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DbTimingsSummary {
    #[serde(rename = "dbTimingsMs", skip_serializing_if = "Vec::is_empty")]
    timings_ms: Vec<f64>,
    #[serde(rename = "dbTotalMs", skip_serializing_if = "Option::is_none")]
    total_ms: Option<f64>,
}

impl DbTimingsSummary {
    pub fn from_samples<I>(samples: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let timings_ms: Vec<f64> = samples
            .into_iter()
            .filter(|ms| ms.is_finite() && *ms >= 0.0)
            .collect();
        let total_ms = if timings_ms.is_empty() {
            None
        } else {
            Some(timings_ms.iter().sum())
        };
        Self {
            timings_ms,
            total_ms,
        }
    }

    /// Same as [`from_samples`](Self::from_samples) for untyped input such as
    /// a persisted log line: strings, nulls and objects are dropped.
    pub fn from_json_values(values: &[Value]) -> Self {
        Self::from_samples(values.iter().filter_map(Value::as_f64))
    }

    pub fn timings_ms(&self) -> &[f64] {
        &self.timings_ms
    }

    pub fn total_ms(&self) -> Option<f64> {
        self.total_ms
    }
}

/// Shape of a record as it appears on disk. Timings are untyped there, so
/// they go back through the same filter and `dbTotalMs` is recomputed.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRecord {
    timestamp: DateTime<Utc>,
    correlation_id: String,
    method: String,
    route: String,
    status_code: u16,
    duration_ms: f64,
    #[serde(default)]
    request_bytes: Option<u64>,
    #[serde(default)]
    response_bytes: Option<u64>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    db_timings_ms: Option<Value>,
}

impl From<WireRecord> for MetricRecord {
    fn from(wire: WireRecord) -> Self {
        let db = match wire.db_timings_ms {
            Some(Value::Array(values)) => DbTimingsSummary::from_json_values(&values),
            _ => DbTimingsSummary::default(),
        };
        Self {
            timestamp: wire.timestamp,
            correlation_id: wire.correlation_id,
            method: wire.method,
            route: wire.route,
            status_code: wire.status_code,
            duration_ms: wire.duration_ms.max(0.0),
            request_bytes: wire.request_bytes,
            response_bytes: wire.response_bytes,
            user_id: wire.user_id,
            db,
        }
    }
}
