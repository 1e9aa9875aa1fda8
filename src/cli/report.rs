//! Rendering of run, comparison and reconciliation results

use serde::Serialize;

use crate::cli::error::CliError;
use crate::pipeline::{PipelineError, RunReport, StrategyComparison};
use crate::reconcile::ReconciliationReport;

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// ASCII table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, CliError> {
    serde_json::to_string_pretty(value).map_err(|e| CliError::SerializationError(e.to_string()))
}

const RUN_COLUMNS: [&str; 12] = [
    "mode", "outcome", "processed", "written", "excluded", "filtered", "errors", "commits",
    "batches", "fetches", "elapsed", "rows/s",
];

fn run_row(report: &RunReport) -> Vec<String> {
    let s = &report.statistics;
    vec![
        s.mode.to_string(),
        report.outcome.to_string(),
        s.processed.to_string(),
        s.written.to_string(),
        s.excluded.to_string(),
        s.filtered.to_string(),
        s.errors.to_string(),
        s.commits.to_string(),
        s.batches.to_string(),
        s.fetches.to_string(),
        s.duration_string(),
        format!("{:.0}", s.throughput()),
    ]
}

/// Render the report of a single run.
pub fn render_run(report: &RunReport, format: OutputFormat) -> Result<String, CliError> {
    match format {
        OutputFormat::Json => to_json(report),
        OutputFormat::Table => Ok(format_table(&RUN_COLUMNS, &[run_row(report)])),
    }
}

/// Render the final statistics of a run, including an aborted one.
///
/// Returns `None` only when the run never started.
pub fn render_run_result(
    result: &Result<RunReport, PipelineError>,
    format: OutputFormat,
) -> Result<Option<String>, CliError> {
    let partial;
    let report = match result {
        Ok(report) => report,
        Err(e) => match e.partial_report() {
            Some(report) => {
                partial = report;
                &partial
            }
            None => return Ok(None),
        },
    };
    render_run(report, format).map(Some)
}

/// Render every mode's report plus the equivalence verdict.
pub fn render_comparison(
    comparison: &StrategyComparison,
    format: OutputFormat,
) -> Result<String, CliError> {
    match format {
        OutputFormat::Json => to_json(comparison),
        OutputFormat::Table => {
            let rows: Vec<Vec<String>> = comparison.reports.iter().map(run_row).collect();
            let mut output = format_table(&RUN_COLUMNS, &rows);
            output.push('\n');
            if comparison.is_equivalent() {
                output.push_str(&format!(
                    "All strategies produced the same {} rows",
                    comparison.reference_rows.len()
                ));
            } else {
                let modes: Vec<String> =
                    comparison.mismatched.iter().map(|m| m.to_string()).collect();
                output.push_str(&format!("Mismatched strategies: {}", modes.join(", ")));
            }
            Ok(output)
        }
    }
}

/// Render per-code summaries and the issued/target verdict.
pub fn render_reconciliation(
    report: &ReconciliationReport,
    format: OutputFormat,
) -> Result<String, CliError> {
    match format {
        OutputFormat::Json => to_json(report),
        OutputFormat::Table => {
            let rows: Vec<Vec<String>> = report
                .summaries
                .iter()
                .map(|s| vec![s.code.clone(), s.count.to_string(), s.average_point.to_string()])
                .collect();
            let mut output = format_table(&["code", "count", "avg_point"], &rows);
            output.push('\n');

            let ratio = report
                .ratio_percent
                .map(|r| format!("{:.2}%", r))
                .unwrap_or_else(|| "n/a".to_string());
            output.push_str(&format!(
                "period {}: issued {} of {} eligible ({}), {} tolerance of {}%",
                report.period_key,
                report.issued,
                report.target,
                ratio,
                if report.within_tolerance { "within" } else { "OUTSIDE" },
                report.tolerance_percent
            ));
            Ok(output)
        }
    }
}

/// Lay out rows under a header, padding every column to its widest cell.
fn format_table(columns: &[&str], rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return "(0 rows)".to_string();
    }

    // Widths count characters so Korean text lines up with ASCII
    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in rows {
        for (i, value) in row.iter().enumerate().take(widths.len()) {
            widths[i] = widths[i].max(value.chars().count());
        }
    }

    let mut output = String::new();

    let header: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{:width$}", c, width = widths[i]))
        .collect();
    output.push_str(&header.join(" | "));
    output.push('\n');

    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    output.push_str(&separator.join("-+-"));
    output.push('\n');

    for row in rows {
        let values: Vec<String> = row
            .iter()
            .enumerate()
            .take(widths.len())
            .map(|(i, s)| format!("{:width$}", s, width = widths[i]))
            .collect();
        output.push_str(&values.join(" | "));
        output.push('\n');
    }

    output.push_str(&format!("({} rows)", rows.len()));
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CodeSummary, WriteMode};
    use crate::pipeline::{RunOutcome, RunStatistics};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn report() -> RunReport {
        let mut statistics = RunStatistics::new(WriteMode::ArrayBatch, true);
        statistics.processed = 5;
        statistics.written = 5;
        statistics.commits = 3;
        RunReport {
            outcome: RunOutcome::Completed,
            statistics,
        }
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("table").unwrap(), OutputFormat::Table);
        assert_eq!(OutputFormat::from_str("JSON").unwrap(), OutputFormat::Json);
        assert!(OutputFormat::from_str("csv").is_err());
    }

    #[test]
    fn test_run_table() {
        let output = render_run(&report(), OutputFormat::Table).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert!(lines[0].starts_with("mode"));
        assert!(lines[2].starts_with("array-batch"));
        assert!(lines[2].contains("completed"));
        assert_eq!(lines.last(), Some(&"(1 rows)"));
    }

    #[test]
    fn test_run_json() {
        let output = render_run(&report(), OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["outcome"], "completed");
        assert_eq!(value["statistics"]["written"], 5);
    }

    #[test]
    fn test_reconciliation_table() {
        let summaries = vec![CodeSummary {
            code: "AA".to_string(),
            count: 2,
            average_point: Decimal::new(50000, 2),
        }];
        let report = ReconciliationReport::new("202506", summaries, 2, 2, 1.0);
        let output = render_reconciliation(&report, OutputFormat::Table).unwrap();
        assert!(output.contains("AA"));
        assert!(output.contains("500.00"));
        assert!(output.contains("issued 2 of 2 eligible (100.00%), within"));
    }

    #[test]
    fn test_empty_table() {
        assert_eq!(format_table(&["code"], &[]), "(0 rows)");
    }
}
