//! JSON output for run reports.

use crate::scheduler::{JobReport, RunReport};
use serde::Serialize;

#[derive(Serialize)]
struct ReportView<'a> {
    success: bool,
    first_failure: Option<usize>,
    thread_count: usize,
    elapsed_ms: u128,
    jobs: Vec<JobView<'a>>,
}

#[derive(Serialize)]
struct JobView<'a> {
    #[serde(flatten)]
    report: &'a JobReport,
    status: crate::scheduler::JobStatus,
}

/// Serialize a run report as pretty JSON.
pub fn render_json(report: &RunReport) -> serde_json::Result<String> {
    let view = ReportView {
        success: report.success,
        first_failure: report.first_failure,
        thread_count: report.thread_count,
        elapsed_ms: report.elapsed.as_millis(),
        jobs: report
            .jobs
            .iter()
            .map(|job| JobView {
                report: job,
                status: job.status(),
            })
            .collect(),
    };
    serde_json::to_string_pretty(&view)
}

/// Print a run report as JSON.
pub fn print_json(report: &RunReport) {
    let json = render_json(report).unwrap_or_else(|_| "{}".to_string());
    println!("{}", json);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::tests::sample_report;

    #[test]
    fn test_render_json_fields() {
        let json = render_json(&sample_report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["success"], false);
        assert_eq!(value["first_failure"], 1);
        assert_eq!(value["elapsed_ms"], 42);
        assert_eq!(value["jobs"][0]["status"], "succeeded");
        assert_eq!(value["jobs"][1]["status"], "failed");
        assert_eq!(value["jobs"][2]["status"], "not_started");
        assert_eq!(value["jobs"][2]["output"], serde_json::Value::Null);
        assert_eq!(value["jobs"][1]["job"]["entry_point"], "Main");
    }
}
