//! Benchmark reports and their output formats

use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use comfy_table::{Attribute, Cell, CellAlignment, ContentArrangement, Table};
use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;
use crate::error::Result;
use crate::metrics::{OperationStats, WorkerStats};
use crate::types::OpKind;

/// How a benchmark run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunOutcome {
    /// Budget spent or duration elapsed
    Completed,
    /// Stopped by the user; statistics cover what was recorded
    Interrupted,
    /// A fatal error drained the run
    Aborted { reason: String },
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Interrupted => "interrupted",
            RunOutcome::Aborted { .. } => "aborted",
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Aborted { reason } => write!(f, "aborted: {}", reason),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Result of one benchmark run. Built once when the run reaches `Done`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub benchmark: String,
    pub backend: BackendKind,
    pub started_at: DateTime<Utc>,
    pub concurrency: usize,
    pub seed: u64,
    #[serde(flatten)]
    pub outcome: RunOutcome,
    #[serde(with = "serde_duration")]
    pub elapsed: Duration,
    pub operations_total: u64,
    pub successes: u64,
    pub failures: u64,
    /// Operations per second over the whole run
    pub throughput: f64,
    /// Best one-second window
    pub peak_throughput: f64,
    pub operations: Vec<OperationStats>,
    pub workers: Vec<WorkerStats>,
}

impl Report {
    pub fn stats(&self, kind: OpKind) -> Option<&OperationStats> {
        self.operations.iter().find(|s| s.kind == kind)
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.outcome, RunOutcome::Aborted { .. })
    }

    pub fn success_rate(&self) -> f64 {
        if self.operations_total == 0 {
            0.0
        } else {
            (self.successes as f64 / self.operations_total as f64) * 100.0
        }
    }
}

mod serde_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

/// Report output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Csv,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" | "text" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(format!(
                "unknown output format '{}', expected table, json or csv",
                other
            )),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputFormat::Table => "table",
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
        })
    }
}

/// Write `reports` to `out` in `format`
pub fn render<W: Write>(reports: &[Report], format: OutputFormat, out: &mut W) -> Result<()> {
    match format {
        OutputFormat::Table => render_table(reports, out),
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, reports)?;
            writeln!(out)?;
            Ok(())
        }
        OutputFormat::Csv => render_csv(reports, out),
    }
}

fn render_table<W: Write>(reports: &[Report], out: &mut W) -> Result<()> {
    for report in reports {
        writeln!(
            out,
            "{} on {}: {} ops in {:.3}s, {:.1} ops/s (peak {:.1}), {} failed, {}",
            report.benchmark,
            report.backend,
            report.operations_total,
            report.elapsed.as_secs_f64(),
            report.throughput,
            report.peak_throughput,
            report.failures,
            report.outcome,
        )?;

        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(
            [
                "op", "count", "ok", "failed", "retryable", "min", "mean", "p50", "p90", "p99",
                "max",
            ]
            .into_iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold)),
        );

        for stats in &report.operations {
            let mut row = vec![Cell::new(stats.kind.as_str())];
            row.extend(
                [
                    stats.count.to_string(),
                    stats.successes.to_string(),
                    stats.failures.to_string(),
                    stats.transient_failures.to_string(),
                    format_nanos(stats.min_ns),
                    format_nanos(stats.mean_ns),
                    format_nanos(stats.p50_ns),
                    format_nanos(stats.p90_ns),
                    format_nanos(stats.p99_ns),
                    format_nanos(stats.max_ns),
                ]
                .into_iter()
                .map(|v| Cell::new(v).set_alignment(CellAlignment::Right)),
            );
            table.add_row(row);
        }

        writeln!(out, "{}", table)?;
        writeln!(out)?;
    }

    let total_ops: u64 = reports.iter().map(|r| r.operations_total).sum();
    let total_failures: u64 = reports.iter().map(|r| r.failures).sum();
    let total_elapsed: f64 = reports.iter().map(|r| r.elapsed.as_secs_f64()).sum();
    writeln!(
        out,
        "total: {} benchmarks, {} ops, {} failed, {:.3}s",
        reports.len(),
        total_ops,
        total_failures,
        total_elapsed
    )?;
    Ok(())
}

/// One CSV line: a report header joined with the stats of one kind
#[derive(Serialize)]
struct CsvRow<'a> {
    benchmark: &'a str,
    backend: &'a str,
    status: &'a str,
    concurrency: usize,
    seed: u64,
    elapsed_secs: f64,
    throughput: f64,
    peak_throughput: f64,
    kind: &'a str,
    count: u64,
    successes: u64,
    failures: u64,
    transient_failures: u64,
    rejected_failures: u64,
    fatal_failures: u64,
    min_ns: u64,
    mean_ns: u64,
    p50_ns: u64,
    p90_ns: u64,
    p99_ns: u64,
    max_ns: u64,
}

fn render_csv<W: Write>(reports: &[Report], out: &mut W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    for report in reports {
        for stats in &report.operations {
            writer.serialize(CsvRow {
                benchmark: &report.benchmark,
                backend: report.backend.as_str(),
                status: report.outcome.as_str(),
                concurrency: report.concurrency,
                seed: report.seed,
                elapsed_secs: report.elapsed.as_secs_f64(),
                throughput: report.throughput,
                peak_throughput: report.peak_throughput,
                kind: stats.kind.as_str(),
                count: stats.count,
                successes: stats.successes,
                failures: stats.failures,
                transient_failures: stats.transient_failures,
                rejected_failures: stats.rejected_failures,
                fatal_failures: stats.fatal_failures,
                min_ns: stats.min_ns,
                mean_ns: stats.mean_ns,
                p50_ns: stats.p50_ns,
                p90_ns: stats.p90_ns,
                p99_ns: stats.p99_ns,
                max_ns: stats.max_ns,
            })?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Human-readable latency
fn format_nanos(ns: u64) -> String {
    if ns >= 1_000_000_000 {
        format!("{:.2}s", ns as f64 / 1e9)
    } else if ns >= 1_000_000 {
        format!("{:.2}ms", ns as f64 / 1e6)
    } else if ns >= 1_000 {
        format!("{:.1}µs", ns as f64 / 1e3)
    } else {
        format!("{}ns", ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> Report {
        Report {
            benchmark: "inserts".to_string(),
            backend: BackendKind::Memory,
            started_at: Utc::now(),
            concurrency: 2,
            seed: 42,
            outcome: RunOutcome::Completed,
            elapsed: Duration::from_millis(1500),
            operations_total: 10,
            successes: 9,
            failures: 1,
            throughput: 6.67,
            peak_throughput: 7.0,
            operations: vec![OperationStats {
                kind: OpKind::Insert,
                count: 10,
                successes: 9,
                failures: 1,
                transient_failures: 1,
                rejected_failures: 0,
                fatal_failures: 0,
                min_ns: 1_000,
                max_ns: 9_000_000,
                mean_ns: 2_000_000,
                p50_ns: 1_500_000,
                p90_ns: 8_000_000,
                p99_ns: 9_000_000,
            }],
            workers: vec![],
        }
    }

    #[test]
    fn test_json_has_flat_status() {
        let mut out = Vec::new();
        render(&[sample_report()], OutputFormat::Json, &mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value[0]["status"], "completed");
        assert_eq!(value[0]["elapsed"], 1.5);
        assert_eq!(value[0]["operations"][0]["kind"], "insert");

        let parsed: Vec<Report> = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed[0].outcome, RunOutcome::Completed);
        assert_eq!(parsed[0].elapsed, Duration::from_millis(1500));
    }

    #[test]
    fn test_aborted_reason_is_serialized() {
        let mut report = sample_report();
        report.outcome = RunOutcome::Aborted {
            reason: "postgres: connection lost".to_string(),
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status"], "aborted");
        assert_eq!(value["reason"], "postgres: connection lost");
    }

    #[test]
    fn test_csv_one_row_per_kind() {
        let mut out = Vec::new();
        render(&[sample_report()], OutputFormat::Csv, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("benchmark,backend,status,"));
        assert!(lines[1].starts_with("inserts,memory,completed,2,42,"));
    }

    #[test]
    fn test_table_mentions_benchmark() {
        let mut out = Vec::new();
        render(&[sample_report()], OutputFormat::Table, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("inserts on memory"));
        assert!(text.contains("1.50ms"));
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("csv".parse::<OutputFormat>().unwrap(), OutputFormat::Csv);
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_format_nanos() {
        assert_eq!(format_nanos(999), "999ns");
        assert_eq!(format_nanos(2_500_000), "2.50ms");
        assert_eq!(format_nanos(3_000_000_000), "3.00s");
    }
}
