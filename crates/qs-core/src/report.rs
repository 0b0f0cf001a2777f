//! End-of-session reporting and report table operations.
//!
//! [`build_report`] turns the final summary list into category aggregates
//! and per-process detail records for flagged processes; [`publish`] sends
//! them to a telemetry sink. The remaining helpers back the `qs report`
//! table: filtering, sorting, CSV export, and text rendering.

use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use clap::ValueEnum;
use qs_common::{evaluate_flag, FlagThresholds, ProcessPerformanceSummary, SCHEMA_VERSION};
use qs_telemetry::{
    CategoryTotals, ProcessDetail, TelemetryError, TelemetryEvent, TelemetryRecord, TelemetrySink,
};
use serde::Serialize;

use crate::collect::HostInfo;

/// Aggregated view of one finished session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub total_cpu_time_us: u64,
    pub category_totals: CategoryTotals,
    pub details: Vec<ProcessDetail>,
}

/// Whether an image directory is the system directory.
///
/// Exact, ASCII case-insensitive comparison; a trailing separator on either
/// side is ignored. Subdirectories do not match.
pub fn is_in_system_directory(path: &str, system_directory: &Path) -> bool {
    let trim = |s: &str| -> String { s.trim_end_matches(['/', '\\']).to_string() };
    let path = trim(path);
    if path.is_empty() {
        return false;
    }
    let system = trim(&system_directory.to_string_lossy());
    path.eq_ignore_ascii_case(&system)
}

/// Category totals over every summary plus one detail per flagged process.
pub fn build_report(
    summaries: &[ProcessPerformanceSummary],
    thresholds: &FlagThresholds,
    system_directory: &Path,
) -> PerformanceReport {
    let mut report = PerformanceReport::default();
    for summary in summaries {
        report
            .category_totals
            .add(summary.category, summary.total_cpu_time_us);
        report.total_cpu_time_us = report
            .total_cpu_time_us
            .saturating_add(summary.total_cpu_time_us);

        if let Some(reason) = evaluate_flag(summary, thresholds) {
            report.details.push(ProcessDetail {
                reason,
                is_in_system_directory: is_in_system_directory(&summary.path, system_directory),
                name: summary.display_name().to_string(),
                category: summary.category,
                package_identity: summary.package_identity.clone(),
                sample_count: summary.sample_count(),
                average_percent: summary.average_percent(),
                max_percent: summary.max_percent(),
                samples_above_threshold: summary.samples_above_threshold(),
                sigma4_deviation: summary.sigma4_deviation(),
                total_cpu_time_us: summary.total_cpu_time_us,
            });
        }
    }
    report
}

/// Emit the report events in order: performance metrics, computer info,
/// category aggregate, then one event per detail.
pub fn publish(
    report: &PerformanceReport,
    host: &HostInfo,
    sampling_period: Duration,
    session_id: &str,
    sink: &dyn TelemetrySink,
) -> Result<(), TelemetryError> {
    let emit = |event: TelemetryEvent| sink.emit(&TelemetryRecord::new(session_id, event));
    emit(TelemetryEvent::PerformanceMetrics {
        version: SCHEMA_VERSION,
        sampling_period_ms: u64::try_from(sampling_period.as_millis()).unwrap_or(u64::MAX),
        total_cpu_time_us: report.total_cpu_time_us,
    })?;
    emit(TelemetryEvent::ComputerInfo {
        processor_count: host.processor_count,
        processor_name: host.processor_name.clone(),
        motherboard_name: host.motherboard_name.clone(),
        ram_mib: host.ram_mib,
    })?;
    emit(TelemetryEvent::CategoryAggregate(report.category_totals))?;
    for detail in &report.details {
        emit(TelemetryEvent::ProcessDetail(detail.clone()))?;
    }
    sink.flush()
}

// ----------------------------------------------------------------------------
// Table operations
// ----------------------------------------------------------------------------

/// Sort order for the report table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SortKey {
    /// Pid, descending
    #[default]
    Pid,
    /// Name, case-insensitive ascending
    Name,
    /// Category name, ascending
    Category,
    /// Samples above the strike threshold, descending
    AboveThreshold,
    /// Total CPU time, descending
    Cpu,
}

/// Keep summaries whose name or category contains `text`
/// (case-insensitive). An empty filter keeps everything.
pub fn filter_summaries(
    summaries: &[ProcessPerformanceSummary],
    text: &str,
) -> Vec<ProcessPerformanceSummary> {
    let needle = text.trim().to_lowercase();
    summaries
        .iter()
        .filter(|s| {
            needle.is_empty()
                || s.display_name().to_lowercase().contains(&needle)
                || s.category.name().to_lowercase().contains(&needle)
        })
        .cloned()
        .collect()
}

pub fn sort_summaries(summaries: &mut [ProcessPerformanceSummary], key: SortKey) {
    match key {
        SortKey::Pid => summaries.sort_by(|a, b| b.pid.cmp(&a.pid)),
        SortKey::Name => summaries.sort_by(|a, b| {
            a.display_name()
                .to_lowercase()
                .cmp(&b.display_name().to_lowercase())
                .then(a.pid.cmp(&b.pid))
        }),
        SortKey::Category => summaries.sort_by(|a, b| {
            a.category
                .name()
                .cmp(b.category.name())
                .then(a.pid.cmp(&b.pid))
        }),
        SortKey::AboveThreshold => summaries.sort_by(|a, b| {
            b.samples_above_threshold()
                .cmp(&a.samples_above_threshold())
                .then(a.pid.cmp(&b.pid))
        }),
        SortKey::Cpu => summaries.sort_by(|a, b| {
            b.total_cpu_time_us
                .cmp(&a.total_cpu_time_us)
                .then(a.pid.cmp(&b.pid))
        }),
    }
}

pub const CSV_HEADER: &str = "Pid,Name,Samples,Percent,StandardDeviation,Sigma4Deviation,MaxPercent,TimeAboveThreshold,TotalCpuTimeInMicroseconds,PackageIdentity,ServiceName,Path,Category,CreateTime,ExitTime";

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn rfc3339_or_empty(time: Option<chrono::DateTime<chrono::Utc>>) -> String {
    time.map(|t| t.to_rfc3339()).unwrap_or_default()
}

/// Write the table as CSV with [`CSV_HEADER`].
pub fn write_csv<W: Write>(out: &mut W, summaries: &[ProcessPerformanceSummary]) -> io::Result<()> {
    writeln!(out, "{CSV_HEADER}")?;
    for s in summaries {
        writeln!(
            out,
            "{},{},{},{:.4},{:.4},{:.4},{:.4},{},{},{},{},{},{},{},{}",
            s.pid,
            csv_field(s.display_name()),
            s.sample_count(),
            s.average_percent(),
            s.standard_deviation(),
            s.sigma4_deviation(),
            s.max_percent(),
            s.samples_above_threshold(),
            s.total_cpu_time_us,
            csv_field(s.package_identity.as_deref().unwrap_or("")),
            csv_field(s.service_name.as_deref().unwrap_or("")),
            csv_field(&s.path),
            s.category.name(),
            rfc3339_or_empty(s.create_time()),
            rfc3339_or_empty(s.exit_time()),
        )?;
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Rendering
// ----------------------------------------------------------------------------

/// Markdown table of the summaries, flagged rows marked with their reason.
pub fn render_markdown(
    summaries: &[ProcessPerformanceSummary],
    thresholds: &FlagThresholds,
) -> String {
    let mut out = String::new();
    out.push_str("| Pid | Name | Category | Samples | Avg % | StdDev | Sigma4 | Max % | Strikes | CPU (ms) | Flag |\n");
    out.push_str("|----:|------|----------|--------:|------:|-------:|-------:|------:|--------:|---------:|------|\n");
    for s in summaries {
        let flag = evaluate_flag(s, thresholds)
            .map(|r| r.as_str())
            .unwrap_or("");
        let name = if s.has_exited() {
            format!("{} (exited)", s.display_name())
        } else {
            s.display_name().to_string()
        };
        out.push_str(&format!(
            "| {} | {} | {} | {} | {:.2} | {:.2} | {:.2} | {:.2} | {} | {} | {} |\n",
            s.pid,
            name.replace('|', "\\|"),
            s.category,
            s.sample_count(),
            s.average_percent(),
            s.standard_deviation(),
            s.sigma4_deviation(),
            s.max_percent(),
            s.samples_above_threshold(),
            s.total_cpu_time_us / 1000,
            flag,
        ));
    }
    out
}

#[derive(Serialize)]
struct JsonRow<'a> {
    #[serde(flatten)]
    summary: &'a ProcessPerformanceSummary,
    display_name: &'a str,
    average_percent: f64,
    standard_deviation: f64,
    sigma4_deviation: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    flag: Option<&'static str>,
}

/// JSON document: report aggregates plus one row per summary.
pub fn render_json(
    summaries: &[ProcessPerformanceSummary],
    thresholds: &FlagThresholds,
    system_directory: &Path,
) -> serde_json::Value {
    let report = build_report(summaries, thresholds, system_directory);
    let rows: Vec<JsonRow<'_>> = summaries
        .iter()
        .map(|s| JsonRow {
            summary: s,
            display_name: s.display_name(),
            average_percent: s.average_percent(),
            standard_deviation: s.standard_deviation(),
            sigma4_deviation: s.sigma4_deviation(),
            flag: evaluate_flag(s, thresholds).map(|r| r.as_str()),
        })
        .collect();
    serde_json::json!({
        "schema_version": SCHEMA_VERSION,
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "process_count": summaries.len(),
        "flagged_count": report.details.len(),
        "total_cpu_time_us": report.total_cpu_time_us,
        "category_totals": report.category_totals,
        "processes": rows,
    })
}

/// One-line digest.
pub fn render_summary_line(
    summaries: &[ProcessPerformanceSummary],
    thresholds: &FlagThresholds,
) -> String {
    let flagged = summaries
        .iter()
        .filter(|s| evaluate_flag(s, thresholds).is_some())
        .count();
    let exited = summaries.iter().filter(|s| s.has_exited()).count();
    let cpu_ms: u64 = summaries
        .iter()
        .fold(0u64, |acc, s| acc.saturating_add(s.total_cpu_time_us))
        / 1000;
    format!(
        "{} processes ({} exited), {} flagged, {} ms CPU",
        summaries.len(),
        exited,
        flagged,
        cpu_ms
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use qs_common::{FlagReason, ProcessCategory};
    use qs_math::SampleStats;
    use qs_telemetry::MemorySink;

    fn summary(pid: u32, name: &str, category: ProcessCategory, samples: &[f64]) -> ProcessPerformanceSummary {
        let mut s = ProcessPerformanceSummary::new(pid, name, category);
        s.stats = SampleStats::from_samples(samples, 2.0);
        s.total_cpu_time_us = (samples.iter().sum::<f64>() * 1000.0) as u64;
        s.path = "/usr/bin".to_string();
        s
    }

    fn fixture() -> Vec<ProcessPerformanceSummary> {
        vec![
            summary(10, "hog", ProcessCategory::Unknown, &[0.0, 25.0, 0.0]),
            summary(20, "quiet", ProcessCategory::Background, &[0.0, 0.1, 0.0]),
            summary(30, "baloo_file", ProcessCategory::Background, &[0.1]),
            summary(40, "code", ProcessCategory::Developer, &[3.0, 0.0, 3.0, 0.0]),
        ]
    }

    #[test]
    fn test_system_directory_is_exact_case_insensitive() {
        let dir = Path::new("/usr/sbin");
        assert!(is_in_system_directory("/usr/sbin", dir));
        assert!(is_in_system_directory("/USR/SBIN/", dir));
        assert!(!is_in_system_directory("/usr/sbin/extra", dir));
        assert!(!is_in_system_directory("/usr/bin", dir));
        assert!(!is_in_system_directory("", dir));
    }

    #[test]
    fn test_build_report_totals_and_details() {
        let summaries = fixture();
        let report = build_report(&summaries, &FlagThresholds::default(), Path::new("/usr/sbin"));

        assert_eq!(report.category_totals.total_processes(), 4);
        assert_eq!(report.category_totals.get(ProcessCategory::Background).process_count, 2);
        let expected_total: u64 = summaries.iter().map(|s| s.total_cpu_time_us).sum();
        assert_eq!(report.total_cpu_time_us, expected_total);
        assert_eq!(report.category_totals.total_cpu_time_us(), expected_total);

        let reasons: Vec<(String, FlagReason)> = report
            .details
            .iter()
            .map(|d| (d.name.clone(), d.reason))
            .collect();
        assert_eq!(
            reasons,
            vec![
                ("hog".to_string(), FlagReason::MaxPercent),
                ("baloo_file".to_string(), FlagReason::SearchIndexer),
                ("code".to_string(), FlagReason::StandardDeviation),
            ]
        );
        let hog = &report.details[0];
        assert_eq!(hog.sample_count, 3);
        assert!((hog.max_percent - 25.0).abs() < 1e-9);
        assert_eq!(hog.samples_above_threshold, 1);
        assert!(!hog.is_in_system_directory);
    }

    #[test]
    fn test_publish_event_order() {
        let summaries = fixture();
        let report = build_report(&summaries, &FlagThresholds::default(), Path::new("/usr/sbin"));
        let sink = MemorySink::new();
        publish(&report, &HostInfo::default(), Duration::from_secs(1), "qs-test", &sink).unwrap();
        assert_eq!(
            sink.event_names(),
            vec![
                "performance_metrics",
                "computer_info",
                "category_aggregate",
                "process_detail",
                "process_detail",
                "process_detail",
            ]
        );
        match &sink.records()[0].event {
            TelemetryEvent::PerformanceMetrics { sampling_period_ms, total_cpu_time_us, .. } => {
                assert_eq!(*sampling_period_ms, 1000);
                assert_eq!(*total_cpu_time_us, report.total_cpu_time_us);
            }
            other => panic!("unexpected first event {other:?}"),
        }
    }

    #[test]
    fn test_filter_matches_name_and_category() {
        let summaries = fixture();
        let by_name = filter_summaries(&summaries, "HOG");
        assert_eq!(by_name.len(), 1);
        let by_category = filter_summaries(&summaries, "background");
        assert_eq!(by_category.len(), 2);
        assert_eq!(filter_summaries(&summaries, "").len(), 4);
    }

    #[test]
    fn test_sort_orders() {
        let mut summaries = fixture();
        sort_summaries(&mut summaries, SortKey::Pid);
        assert_eq!(summaries.iter().map(|s| s.pid).collect::<Vec<_>>(), vec![40, 30, 20, 10]);

        sort_summaries(&mut summaries, SortKey::Name);
        assert_eq!(summaries[0].name, "baloo_file");

        sort_summaries(&mut summaries, SortKey::Cpu);
        assert_eq!(summaries[0].name, "hog");

        sort_summaries(&mut summaries, SortKey::AboveThreshold);
        assert_eq!(summaries[0].name, "code");
    }

    #[test]
    fn test_csv_header_and_escaping() {
        let mut s = summary(7, "odd,name", ProcessCategory::User, &[1.0]);
        s.service_name = Some("svc \"x\"".to_string());
        let mut buf = Vec::new();
        write_csv(&mut buf, &[s]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER));
        let row = lines.next().unwrap();
        assert!(row.starts_with("7,\"odd,name\",1,"));
        assert!(row.contains("\"svc \"\"x\"\"\""));
        assert!(row.contains(",User,"));
    }

    #[test]
    fn test_render_formats() {
        let summaries = fixture();
        let t = FlagThresholds::default();
        let md = render_markdown(&summaries, &t);
        assert!(md.starts_with("| Pid |"));
        assert!(md.contains("| hog |"));
        assert!(md.contains("MaxPercent"));

        let json = render_json(&summaries, &t, Path::new("/usr/sbin"));
        assert_eq!(json["process_count"], 4);
        assert_eq!(json["flagged_count"], 3);
        assert_eq!(json["processes"][0]["flag"], "MaxPercent");

        let line = render_summary_line(&summaries, &t);
        assert!(line.starts_with("4 processes (0 exited), 3 flagged"));
    }
}
