//! Plain text output for run reports.

use crate::scheduler::RunReport;

/// Tab-separated rows, one per job, with a header line.
pub fn render_plain(report: &RunReport) -> String {
    let mut out = String::from("INDEX\tSOURCE\tENTRY\tPLATFORM\tSTAGE\tSTATUS\tTHREAD\n");
    for job in &report.jobs {
        let thread = job
            .thread_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
            job.index,
            job.job.source,
            job.job.entry_point,
            job.job.target.platform,
            job.job.target.stage.as_str(),
            job.status().as_str(),
            thread
        ));
    }
    out
}

/// Print a run report as plain text, followed by an uncolored summary.
pub fn print_plain(report: &RunReport) {
    if report.jobs.is_empty() {
        println!("No jobs submitted.");
        return;
    }
    print!("{}", render_plain(report));
    match report.first_failed_job() {
        Some(job) => println!("batch failed, first failure = job {}", job.index),
        None if report.success => println!("ok"),
        None => println!("incomplete"),
    }
}
