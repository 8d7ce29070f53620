//! Concurrent compile-job scheduler.
//!
//! Jobs are submitted to a [`JobScheduler`] and compiled by
//! [`run_to_completion`](JobScheduler::run_to_completion) across a pool of
//! OS threads. The calling thread is thread 0 and takes part in compiling;
//! threads `1..n` are long-lived and sleep between runs.
//!
//! Jobs are claimed through a shared atomic cursor, so every job is compiled
//! at most once. Dispatch is fail-fast: once a job fails, no further job is
//! claimed, but jobs already in flight finish.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use shaderfarm::backend::PreprocessCompiler;
//! use shaderfarm::config::SchedulerConfig;
//! use shaderfarm::job::{CompileJob, CompilerEnvironment, Platform, ShaderTarget, Stage};
//! use shaderfarm::scheduler::{JobScheduler, RunOptions};
//!
//! let mut scheduler = JobScheduler::new(SchedulerConfig::default(), Arc::new(PreprocessCompiler))?;
//! scheduler.submit(CompileJob::new(
//!     "BasePass.usf",
//!     "MainPixelShader",
//!     ShaderTarget::new(Platform::PcD3dSm3, Stage::Pixel),
//!     CompilerEnvironment::default(),
//! ));
//! let report = scheduler.run_to_completion(RunOptions::default())?;
//! assert!(report.success);
//! # Ok::<(), shaderfarm::error::Error>(())
//! ```

mod report;
mod state;
mod thread_worker;

pub use report::{JobReport, JobStatus, RunReport};
pub(crate) use thread_worker::panic_message;

use crate::backend::ShaderCompiler;
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::job::CompileJob;
use crate::worker::{ChannelSettings, clean_stale_working_dirs};
use state::RunBatch;
use std::sync::Arc;
use std::time::Instant;
use thread_worker::{Executor, Shared, ThreadWorker, run_guarded};
use tracing::{debug, info, instrument, warn};

/// Per-run options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Write debug dumps; forces a single thread for this run.
    pub dump_debug_artifacts: bool,
    /// Don't log individual job failures.
    pub silent: bool,
}

pub struct JobScheduler {
    shared: Arc<Shared>,
    pending: Vec<CompileJob>,
    /// Threads `1..pool_size`.
    workers: Vec<ThreadWorker>,
    /// Thread 0, the caller.
    primary: Executor,
    pool_size: usize,
    /// A run failed fatally; the pool is rebuilt before the next one.
    poisoned: bool,
}

impl JobScheduler {
    /// Create a scheduler with a single-thread pool.
    ///
    /// Working directories left behind by scheduler processes that are no
    /// longer running are removed.
    pub fn new(config: SchedulerConfig, compiler: Arc<dyn ShaderCompiler>) -> Result<Self> {
        config.validate()?;
        let channel_settings = ChannelSettings::from_config(&config)?;

        match clean_stale_working_dirs(&channel_settings.working_root) {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "Removed stale worker directories"),
            Err(e) => warn!(error = %e, "Failed to clean worker directories"),
        }

        let shared = Arc::new(Shared::new(config, compiler, channel_settings));
        Ok(Self {
            primary: Executor::new(0, Arc::clone(&shared)),
            shared,
            pending: Vec::new(),
            workers: Vec::new(),
            pool_size: 1,
            poisoned: false,
        })
    }

    /// Queue a job for the next run.
    pub fn submit(&mut self, job: CompileJob) {
        self.pending.push(job);
    }

    pub fn pending_jobs(&self) -> &[CompileJob] {
        &self.pending
    }

    /// Threads in the pool, including the calling thread.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Compile every pending job and report the results.
    ///
    /// A job that fails to compile is reported, not returned as an error.
    /// `Err` means a thread or worker process failed, and the run was
    /// abandoned.
    #[instrument(level = "debug", skip_all, fields(jobs = self.pending.len()))]
    pub fn run_to_completion(&mut self, options: RunOptions) -> Result<RunReport> {
        let start = Instant::now();
        let desired = self
            .shared
            .config
            .desired_thread_count(self.pending.len(), options.dump_debug_artifacts);

        if desired != self.pool_size || self.poisoned {
            self.teardown()?;
            self.build(desired)?;
        }

        let jobs = std::mem::take(&mut self.pending);
        let job_count = jobs.len();
        info!(jobs = job_count, threads = self.pool_size, "Compiling shaders");

        let dump = options.dump_debug_artifacts || self.shared.config.dump_debug_artifacts;
        let batch = Arc::new(RunBatch::new(jobs, dump, options.silent));

        self.shared.state.reset();
        self.shared.publish(Arc::clone(&batch));
        for worker in &self.workers {
            worker.health.activate();
        }

        if let Err(e) = run_guarded(&self.shared, &batch, &mut self.primary) {
            self.fail(&e);
            return Err(e);
        }

        self.wait_for_workers()?;
        self.shared.take_batch();

        let first_failure = self.shared.state.first_failure();
        let results = match Arc::try_unwrap(batch) {
            Ok(batch) => batch.into_results(),
            Err(shared) => shared.snapshot(),
        };

        let jobs: Vec<JobReport> = results
            .into_iter()
            .enumerate()
            .map(|(index, (job, slot))| JobReport {
                index,
                job,
                thread_id: slot.as_ref().map(|s| s.thread_id),
                output: slot.map(|s| s.output),
            })
            .collect();
        let success = jobs.iter().all(|j| j.status() == JobStatus::Succeeded);

        let report = RunReport {
            jobs,
            success,
            first_failure,
            thread_count: self.pool_size,
            elapsed: start.elapsed(),
        };
        debug!(
            success,
            first_failure = ?report.first_failure,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Run finished"
        );
        Ok(report)
    }

    /// Poll the pool until every thread is idle, returning the first
    /// captured failure as soon as it shows up.
    fn wait_for_workers(&mut self) -> Result<()> {
        let poll = self.shared.config.poll_interval();
        loop {
            self.check_health()?;
            if self.workers.iter().all(|w| !w.health.is_busy()) {
                // A thread may have failed between the check and going idle.
                return self.check_health();
            }
            std::thread::sleep(poll);
        }
    }

    fn check_health(&mut self) -> Result<()> {
        let failure = self.workers.iter().find_map(|w| w.health.take_failure());
        match failure {
            Some(e) => {
                self.fail(&e);
                Err(e)
            }
            None => Ok(()),
        }
    }

    fn fail(&mut self, error: &Error) {
        warn!(error = %error, "Shader compile run aborted");
        self.shared.state.abort();
        self.poisoned = true;
    }

    fn build(&mut self, threads: usize) -> Result<()> {
        debug!(threads, "Starting shader compiling threads");
        for id in 1..threads {
            match ThreadWorker::spawn(id, Arc::clone(&self.shared)) {
                Ok(worker) => self.workers.push(worker),
                Err(e) => {
                    self.pool_size = self.workers.len() + 1;
                    self.poisoned = true;
                    return Err(e);
                }
            }
        }
        self.pool_size = threads;
        self.poisoned = false;
        Ok(())
    }

    /// Stop and join every non-primary thread.
    ///
    /// Returns a failure a thread captured that no run has reported yet.
    fn teardown(&mut self) -> Result<()> {
        if self.workers.is_empty() {
            self.pool_size = 1;
            return Ok(());
        }

        debug!(threads = self.workers.len(), "Stopping shader compiling threads");
        self.shared.state.kill();

        let mut first_error = None;
        for mut worker in self.workers.drain(..) {
            let joined = worker.join();
            if let Some(e) = worker.health.take_failure().or(joined) {
                first_error.get_or_insert(e);
            }
        }

        self.shared.state.clear_kill();
        self.pool_size = 1;
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!(error = %e, "Shader compiling thread failed during shutdown");
        }
    }
}
