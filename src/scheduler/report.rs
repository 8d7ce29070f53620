//! Results of a scheduler run.

use crate::job::{CompileJob, CompileOutput};
use serde::Serialize;
use std::time::Duration;

/// Outcome of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    Failed,
    /// Never claimed, or claimed after the run started failing.
    NotStarted,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::NotStarted => "not started",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    /// Position in submission order.
    pub index: usize,
    pub job: CompileJob,
    /// `None` when the job never ran.
    pub output: Option<CompileOutput>,
    /// Thread that ran the job.
    pub thread_id: Option<usize>,
}

impl JobReport {
    pub fn status(&self) -> JobStatus {
        match &self.output {
            Some(output) if output.succeeded => JobStatus::Succeeded,
            Some(_) => JobStatus::Failed,
            None => JobStatus::NotStarted,
        }
    }
}

/// Everything `run_to_completion` found out.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub jobs: Vec<JobReport>,
    /// Every job ran and compiled.
    pub success: bool,
    /// Lowest index of a job that failed to compile.
    pub first_failure: Option<usize>,
    pub thread_count: usize,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status() == status).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobReport> {
        self.jobs
            .iter()
            .filter(|j| j.status() == JobStatus::Failed)
    }

    pub fn first_failed_job(&self) -> Option<&JobReport> {
        self.first_failure.and_then(|index| self.jobs.get(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{CompilerEnvironment, Platform, ShaderTarget, Stage};

    fn report(index: usize, output: Option<CompileOutput>) -> JobReport {
        JobReport {
            index,
            job: CompileJob::new(
                "A.usf",
                "Main",
                ShaderTarget::new(Platform::PcD3dSm4, Stage::Vertex),
                CompilerEnvironment::default(),
            ),
            thread_id: output.as_ref().map(|_| 0),
            output,
        }
    }

    #[test]
    fn test_job_status() {
        assert_eq!(
            report(0, Some(CompileOutput::success(Vec::new()))).status(),
            JobStatus::Succeeded
        );
        assert_eq!(
            report(0, Some(CompileOutput::failure("x"))).status(),
            JobStatus::Failed
        );
        assert_eq!(report(0, None).status(), JobStatus::NotStarted);
    }

    #[test]
    fn test_counts_and_first_failure() {
        let run = RunReport {
            jobs: vec![
                report(0, Some(CompileOutput::success(Vec::new()))),
                report(1, Some(CompileOutput::failure("bad"))),
                report(2, None),
            ],
            success: false,
            first_failure: Some(1),
            thread_count: 1,
            elapsed: Duration::from_millis(5),
        };
        assert_eq!(run.count(JobStatus::Succeeded), 1);
        assert_eq!(run.count(JobStatus::Failed), 1);
        assert_eq!(run.count(JobStatus::NotStarted), 1);
        assert_eq!(run.failures().count(), 1);
        assert_eq!(run.first_failed_job().map(|j| j.index), Some(1));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&JobStatus::NotStarted).unwrap();
        assert_eq!(json, "\"not_started\"");
    }
}
