//! Output formatting for run reports.

pub mod json;
pub mod plain;
pub mod table;

use crate::scheduler::{JobStatus, RunReport};
use crate::theme::Themed;

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Colored table output (default).
    #[default]
    Table,
    /// JSON output.
    Json,
    /// Plain text output (no colors).
    Plain,
}

/// Table display options.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableOptions {
    /// Use ASCII borders instead of Unicode.
    pub ascii: bool,
}

/// Format and print a run report.
pub fn print_report(report: &RunReport, format: OutputFormat, options: TableOptions) {
    match format {
        OutputFormat::Table => table::print_table(report, options),
        OutputFormat::Json => json::print_json(report),
        OutputFormat::Plain => plain::print_plain(report),
    }
}

/// One-line outcome of a run, e.g. `5 jobs on 4 threads in 210ms: 3 succeeded, 1 failed, 1 not started`.
pub fn summary_line(report: &RunReport) -> String {
    let counts = format!(
        "{} succeeded, {} failed, {} not started",
        report.count(JobStatus::Succeeded),
        report.count(JobStatus::Failed),
        report.count(JobStatus::NotStarted),
    );
    let head = format!(
        "{} jobs on {} threads in {}ms",
        report.jobs.len(),
        report.thread_count,
        report.elapsed.as_millis()
    );

    match report.first_failed_job() {
        Some(job) => format!(
            "{}: {} ({} {})",
            head,
            counts,
            "batch failed, first failure =".failure(),
            format!("job {} {}", job.index, job.job.label()).source_name()
        ),
        None if report.success => format!("{}: {}", head, counts.success()),
        None => format!("{}: {}", head, counts.warning()),
    }
}
