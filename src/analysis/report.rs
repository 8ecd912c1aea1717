//! Markdown rendering and persistence of offline analysis reports.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::offline::AnalysisReport;
use super::recommend::RecommendationSource;
use crate::error::MonitorResult;
use crate::metrics::RouteSummary;

/// `performance-report-YYYY-MM-DD-HHMMSS-<8 hex>.md`. The random suffix keeps
/// two runs in the same second from overwriting each other.
pub fn report_file_name(generated_at: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "performance-report-{}-{}.md",
        generated_at.format("%Y-%m-%d-%H%M%S"),
        &suffix[..8]
    )
}

/// Render, create `dir` if needed, and write. Returns the new file's path.
pub async fn write_report(dir: &Path, report: &AnalysisReport) -> MonitorResult<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(report_file_name(report.generated_at));
    tokio::fs::write(&path, render_markdown(report)).await?;
    Ok(path)
}

pub fn render_markdown(report: &AnalysisReport) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_body(&mut out, report);
    out
}

fn write_body(out: &mut String, r: &AnalysisReport) -> std::fmt::Result {
    writeln!(out, "# Performance Report")?;
    writeln!(out)?;
    writeln!(out, "- Generated: {}", r.generated_at.to_rfc3339())?;
    writeln!(
        out,
        "- Period: last {:.1} h ({} → {})",
        r.period_hours,
        r.period_start.to_rfc3339(),
        r.generated_at.to_rfc3339()
    )?;
    writeln!(out, "- Source: `{}`", r.log_path)?;
    writeln!(
        out,
        "- Lines read: {} ({} malformed, {} other entries, {} outside the period)",
        r.scan.lines, r.scan.malformed, r.scan.other_entries, r.scan.out_of_period
    )?;
    writeln!(out, "- Requests analysed: {}", r.total_requests)?;
    writeln!(out, "- Routes: {}", r.routes.len())?;

    if !r.warnings.is_empty() {
        writeln!(out)?;
        writeln!(out, "## Warnings")?;
        writeln!(out)?;
        for w in &r.warnings {
            writeln!(out, "- {w}")?;
        }
    }

    writeln!(out)?;
    writeln!(out, "## Routes")?;
    writeln!(out)?;
    route_table(out, &r.routes)?;

    writeln!(out)?;
    writeln!(out, "## Slowest Routes (top {} by p95)", r.slowest.len())?;
    writeln!(out)?;
    route_table(out, &r.slowest)?;

    if !r.distribution.is_empty() {
        writeln!(out)?;
        writeln!(out, "## Latency Distribution")?;
        writeln!(out)?;
        writeln!(out, "| Range (ms) | Requests |")?;
        writeln!(out, "|---|---:|")?;
        for b in &r.distribution {
            writeln!(out, "| {}–{} | {} |", b.range_start_ms, b.range_end_ms, b.count)?;
        }
    }

    writeln!(out)?;
    writeln!(out, "## Bottlenecks")?;
    writeln!(out)?;
    if r.bottlenecks.is_empty() {
        writeln!(out, "None detected.")?;
    } else {
        for f in &r.bottlenecks {
            writeln!(
                out,
                "- **{}** `{}` on `{}`: {}",
                f.severity.as_str(),
                f.kind.as_str(),
                f.route,
                f.message
            )?;
        }
    }

    writeln!(out)?;
    writeln!(out, "## Recommendations")?;
    writeln!(out)?;
    if r.recommendations.source == RecommendationSource::Static {
        writeln!(out, "_General guidance; no generated recommendations were available._")?;
        writeln!(out)?;
    }
    for item in &r.recommendations.items {
        writeln!(out, "- {item}")?;
    }
    Ok(())
}

fn route_table(out: &mut String, routes: &[RouteSummary]) -> std::fmt::Result {
    if routes.is_empty() {
        return writeln!(out, "No requests recorded in this period.");
    }
    writeln!(
        out,
        "| Route | Requests | Avg (ms) | Median (ms) | p95 (ms) | p99 (ms) | DB % | Success % | Avg size (B) |"
    )?;
    writeln!(out, "|---|---:|---:|---:|---:|---:|---:|---:|---:|")?;
    for s in routes {
        writeln!(
            out,
            "| `{}` | {} | {:.1} | {:.1} | {:.1} | {:.1} | {:.1} | {:.1} | {:.0} |",
            s.route,
            s.count,
            s.avg_duration_ms,
            s.median_duration_ms,
            s.p95_duration_ms,
            s.p99_duration_ms,
            s.db_time_percent,
            s.success_rate,
            s.avg_response_bytes
        )?;
    }
    Ok(())
}
