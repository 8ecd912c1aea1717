use std::collections::BTreeMap;

use hdrhistogram::Histogram;
use serde::Serialize;

use super::record::MetricRecord;

/// HdrHistogram range for the distribution chart: 1 ms → 1 h, 3 significant figures.
const HIST_LOW_MS: u64 = 1;
const HIST_HIGH_MS: u64 = 3_600_000;
const HIST_SIGFIG: u8 = 3;

/// Bucket boundaries (ms) for the latency distribution.
const DIST_BOUNDARIES_MS: &[u64] = &[
    10, 25, 50, 100, 200, 300, 500, 750, 1_000, 2_000, 5_000, 10_000,
];

// ─── Route summary ───────────────────────────────────────────────

/// Statistics for one route over one window. Recomputed for every query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSummary {
    pub route: String,
    pub count: u64,
    pub avg_duration_ms: f64,
    pub median_duration_ms: f64,
    pub p95_duration_ms: f64,
    pub p99_duration_ms: f64,
    pub avg_db_time_ms: f64,
    /// Share of the mean duration spent in the database, 0–100.
    pub db_time_percent: f64,
    pub success_count: u64,
    pub error_count: u64,
    /// Percentage of requests with a status in `[200, 400)`.
    pub success_rate: f64,
    pub avg_response_bytes: f64,
}

impl RouteSummary {
    /// Summarise a single route's records. An empty slice yields all zeros.
    pub fn from_records(route: &str, records: &[&MetricRecord]) -> Self {
        let count = records.len() as u64;

        let mut durations: Vec<f64> = records.iter().map(|r| r.duration_ms).collect();
        durations.sort_by(f64::total_cmp);

        let total_duration: f64 = durations.iter().sum();
        let total_db: f64 = records.iter().filter_map(|r| r.db_total_ms()).sum();
        let total_response: f64 = records
            .iter()
            .filter_map(|r| r.response_bytes)
            .map(|b| b as f64)
            .sum();
        let success_count = records.iter().filter(|r| r.is_success()).count() as u64;

        let avg_duration_ms = ratio(total_duration, count as f64);
        let avg_db_time_ms = ratio(total_db, count as f64);

        Self {
            route: route.to_string(),
            count,
            avg_duration_ms,
            median_duration_ms: percentile(&durations, 0.5),
            p95_duration_ms: percentile(&durations, 0.95),
            p99_duration_ms: percentile(&durations, 0.99),
            avg_db_time_ms,
            db_time_percent: ratio(avg_db_time_ms, avg_duration_ms) * 100.0,
            success_count,
            error_count: count - success_count,
            success_rate: ratio(success_count as f64, count as f64) * 100.0,
            avg_response_bytes: ratio(total_response, count as f64),
        }
    }

    /// Percentage of requests outside `[200, 400)`; 0 for an empty route.
    pub fn error_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            100.0 - self.success_rate
        }
    }
}

/// Group records by route and summarise each group, ordered by route.
pub fn summarize<'a, I>(records: I) -> Vec<RouteSummary>
where
    I: IntoIterator<Item = &'a MetricRecord>,
{
    let mut by_route: BTreeMap<&str, Vec<&MetricRecord>> = BTreeMap::new();
    for record in records {
        by_route.entry(record.route.as_str()).or_default().push(record);
    }
    by_route
        .into_iter()
        .map(|(route, group)| RouteSummary::from_records(route, &group))
        .collect()
}

/// Value at index `floor(len * p)` of an ascending slice, clamped to the
/// last element. 0 for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64) * p).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

// ─── Latency distribution ────────────────────────────────────────

/// A bucket in the latency distribution histogram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistBucket {
    pub range_start_ms: u64,
    pub range_end_ms: u64,
    pub count: u64,
}

/// Bucket every duration into the fixed boundaries, skipping empty buckets.
pub fn distribution<'a, I>(records: I) -> Vec<DistBucket>
where
    I: IntoIterator<Item = &'a MetricRecord>,
{
    let Ok(mut hist) = Histogram::<u64>::new_with_bounds(HIST_LOW_MS, HIST_HIGH_MS, HIST_SIGFIG)
    else {
        return Vec::new();
    };
    for record in records {
        // Clamp to the histogram range; sub-millisecond requests land in the first bucket.
        let ms = (record.duration_ms.ceil() as u64).clamp(HIST_LOW_MS, HIST_HIGH_MS);
        let _ = hist.record(ms);
    }
    compute_distribution(&hist)
}

fn compute_distribution(hist: &Histogram<u64>) -> Vec<DistBucket> {
    if hist.len() == 0 {
        return Vec::new();
    }

    let bounds = DIST_BOUNDARIES_MS;
    let mut counts = vec![0u64; bounds.len() + 1]; // +1 for overflow

    for iv in hist.iter_recorded() {
        // Iteration reports the top of each equivalence range; bucket on its
        // bottom so a value sitting on a boundary stays in that bucket.
        let val = hist.lowest_equivalent(iv.value_iterated_to());
        // First boundary >= val
        let idx = match bounds.binary_search(&val) {
            Ok(i) | Err(i) => i,
        };
        counts[idx.min(bounds.len())] += iv.count_at_value();
    }

    let mut result = Vec::with_capacity(counts.len());
    let mut prev = 0u64;
    for (i, &boundary) in bounds.iter().enumerate() {
        if counts[i] > 0 {
            result.push(DistBucket {
                range_start_ms: prev,
                range_end_ms: boundary,
                count: counts[i],
            });
        }
        prev = boundary;
    }
    if counts[bounds.len()] > 0 {
        result.push(DistBucket {
            range_start_ms: prev,
            range_end_ms: hist.max(),
            count: counts[bounds.len()],
        });
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::record::tests::record;
    use crate::metrics::record::DbTimingsSummary;

    #[test]
    fn p95_of_ten_values_is_the_last() {
        let sorted: Vec<f64> = (1..=10).map(|i| (i * 10) as f64).collect();
        assert_eq!(percentile(&sorted, 0.95), 100.0);
        assert_eq!(percentile(&sorted, 0.99), 100.0);
        assert_eq!(percentile(&sorted, 0.5), 60.0);
    }

    #[test]
    fn percentile_of_empty_is_zero() {
        assert_eq!(percentile(&[], 0.95), 0.0);
        let summary = RouteSummary::from_records("/empty", &[]);
        assert_eq!(summary.count, 0);
        assert_eq!(summary.p95_duration_ms, 0.0);
        assert_eq!(summary.avg_duration_ms, 0.0);
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.error_rate(), 0.0);
    }

    #[test]
    fn success_rate_counts_only_2xx_3xx() {
        let mut records: Vec<MetricRecord> =
            (0..8).map(|_| record("/api/jobs", 200, 10.0)).collect();
        records.push(record("/api/jobs", 500, 10.0));
        records.push(record("/api/jobs", 500, 10.0));

        let summaries = summarize(&records);
        assert_eq!(summaries.len(), 1);
        let s = &summaries[0];
        assert_eq!(s.count, 10);
        assert_eq!(s.success_count, 8);
        assert_eq!(s.error_count, 2);
        assert_eq!(s.success_rate, 80.0);
        assert!((s.error_rate() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn unsorted_durations_are_sorted_before_indexing() {
        let records: Vec<MetricRecord> = [70.0, 10.0, 100.0, 40.0, 20.0, 90.0, 30.0, 80.0, 50.0, 60.0]
            .into_iter()
            .map(|d| record("/r", 200, d))
            .collect();
        let s = &summarize(&records)[0];
        assert_eq!(s.p95_duration_ms, 100.0);
        assert_eq!(s.median_duration_ms, 60.0);
        assert_eq!(s.avg_duration_ms, 55.0);
    }

    #[test]
    fn db_share_and_response_size_divide_by_count() {
        let mut a = record("/r", 200, 100.0);
        a.db = DbTimingsSummary::from_samples([30.0, 30.0]);
        a.response_bytes = Some(2_000);
        let b = record("/r", 200, 100.0);

        let s = &summarize([&a, &b])[0];
        assert_eq!(s.avg_db_time_ms, 30.0);
        assert!((s.db_time_percent - 30.0).abs() < 1e-9);
        assert_eq!(s.avg_response_bytes, 1_000.0);
    }

    #[test]
    fn groups_by_route_in_name_order() {
        let records = vec![
            record("/b", 200, 1.0),
            record("/a", 200, 1.0),
            record("/b", 404, 1.0),
        ];
        let summaries = summarize(&records);
        let routes: Vec<&str> = summaries.iter().map(|s| s.route.as_str()).collect();
        assert_eq!(routes, ["/a", "/b"]);
        assert_eq!(summaries[1].count, 2);
    }

    #[test]
    fn distribution_buckets_durations() {
        let records: Vec<MetricRecord> = [5.0, 8.0, 40.0, 600.0, 20_000.0]
            .into_iter()
            .map(|d| record("/r", 200, d))
            .collect();
        let dist = distribution(&records);
        let total: u64 = dist.iter().map(|b| b.count).sum();
        assert_eq!(total, 5);
        assert_eq!(dist[0], DistBucket { range_start_ms: 0, range_end_ms: 10, count: 2 });
        assert_eq!(dist.last().unwrap().range_start_ms, 10_000);
    }

    #[test]
    fn boundary_values_stay_in_their_bucket() {
        let records: Vec<MetricRecord> = [1_000.0, 5_000.0, 10_000.0]
            .into_iter()
            .map(|d| record("/r", 200, d))
            .collect();
        let dist = distribution(&records);
        assert_eq!(
            dist,
            [
                DistBucket { range_start_ms: 750, range_end_ms: 1_000, count: 1 },
                DistBucket { range_start_ms: 2_000, range_end_ms: 5_000, count: 1 },
                DistBucket { range_start_ms: 5_000, range_end_ms: 10_000, count: 1 },
            ]
        );
    }

    #[test]
    fn distribution_of_nothing_is_empty() {
        assert!(distribution(std::iter::empty()).is_empty());
    }
}
