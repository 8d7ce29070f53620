//! Colored table output for run reports.

use crate::output::TableOptions;
use crate::scheduler::{JobReport, RunReport};
use crate::theme::{Semantic, ThemedCell};
use comfy_table::{
    Cell, ContentArrangement, Table,
    presets::{ASCII_FULL, UTF8_FULL},
};

/// Build the report table.
pub fn render_table(report: &RunReport, options: TableOptions) -> Table {
    let mut table = Table::new();

    if options.ascii {
        table.load_preset(ASCII_FULL);
    } else {
        table.load_preset(UTF8_FULL);
    }
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "#", "Source", "Entry", "Platform", "Stage", "Status", "Thread", "Detail",
    ]);

    for job in &report.jobs {
        let thread = job
            .thread_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            Cell::new(job.index),
            Cell::new(&job.job.source).themed(Semantic::Source),
            Cell::new(&job.job.entry_point).themed(Semantic::EntryPoint),
            Cell::new(job.job.target.platform).themed(Semantic::Platform),
            Cell::new(job.job.target.stage.as_str()),
            Cell::new(job.status()).themed(job.status().into()),
            Cell::new(thread).themed(Semantic::Muted),
            Cell::new(detail(job)),
        ]);
    }

    table
}

/// First error line for failures, instruction count for successes.
fn detail(job: &JobReport) -> String {
    match &job.output {
        Some(output) if output.succeeded => format!("{} instructions", output.instruction_count),
        Some(output) => output
            .errors
            .first()
            .map(|e| e.lines().next().unwrap_or_default().to_string())
            .unwrap_or_else(|| "failed".to_string()),
        None => "-".to_string(),
    }
}

/// Print a run report as a colored table.
pub fn print_table(report: &RunReport, options: TableOptions) {
    if report.jobs.is_empty() {
        println!("No jobs submitted.");
        return;
    }
    println!("{}", render_table(report, options));
}
