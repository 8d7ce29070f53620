//! State shared by every thread of the pool.

use crate::job::{CompileJob, CompileOutput};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

const NO_FAILURE: usize = usize::MAX;

/// Claim cursor and stop flags, reset at the start of each run.
#[derive(Debug)]
pub(crate) struct SharedRunState {
    cursor: AtomicUsize,
    error: AtomicBool,
    /// Lowest failing job index, `NO_FAILURE` when none failed.
    first_failure: AtomicUsize,
    kill: AtomicBool,
}

impl Default for SharedRunState {
    fn default() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
            error: AtomicBool::new(false),
            first_failure: AtomicUsize::new(NO_FAILURE),
            kill: AtomicBool::new(false),
        }
    }
}

impl SharedRunState {
    /// Prepare for a new run. Leaves the kill flag alone.
    pub fn reset(&self) {
        self.cursor.store(0, Ordering::SeqCst);
        self.first_failure.store(NO_FAILURE, Ordering::SeqCst);
        self.error.store(false, Ordering::SeqCst);
    }

    /// Take the next queue index. Indices are handed out exactly once.
    pub fn claim(&self) -> usize {
        self.cursor.fetch_add(1, Ordering::SeqCst)
    }

    pub fn error_set(&self) -> bool {
        self.error.load(Ordering::Acquire)
    }

    /// Mark job `index` as failed; no further jobs are dispatched.
    pub fn record_failure(&self, index: usize) {
        self.first_failure.fetch_min(index, Ordering::SeqCst);
        self.error.store(true, Ordering::Release);
    }

    /// Stop dispatching after an infrastructure failure.
    pub fn abort(&self) {
        self.error.store(true, Ordering::Release);
    }

    pub fn first_failure(&self) -> Option<usize> {
        match self.first_failure.load(Ordering::SeqCst) {
            NO_FAILURE => None,
            index => Some(index),
        }
    }

    pub fn kill(&self) {
        self.kill.store(true, Ordering::Release);
    }

    pub fn killed(&self) -> bool {
        self.kill.load(Ordering::Acquire)
    }

    pub fn clear_kill(&self) {
        self.kill.store(false, Ordering::Release);
    }
}

/// Result of one job and the thread that produced it.
#[derive(Debug, Clone)]
pub(crate) struct JobSlot {
    pub output: CompileOutput,
    pub thread_id: usize,
}

/// The jobs of one run, frozen, with one write-once result slot per job.
#[derive(Debug)]
pub(crate) struct RunBatch {
    jobs: Vec<CompileJob>,
    slots: Vec<OnceLock<JobSlot>>,
    pub dump_debug_artifacts: bool,
    pub silent: bool,
}

impl RunBatch {
    pub fn new(jobs: Vec<CompileJob>, dump_debug_artifacts: bool, silent: bool) -> Self {
        let slots = jobs.iter().map(|_| OnceLock::new()).collect();
        Self {
            jobs,
            slots,
            dump_debug_artifacts,
            silent,
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn job(&self, index: usize) -> Option<&CompileJob> {
        self.jobs.get(index)
    }

    /// Store the result of a claimed job. Only the claiming thread writes a
    /// slot, so a second write never happens.
    pub fn store(&self, index: usize, output: CompileOutput, thread_id: usize) {
        if let Some(slot) = self.slots.get(index) {
            let _ = slot.set(JobSlot { output, thread_id });
        }
    }

    /// Hand the jobs and their results back once every thread is done.
    pub fn into_results(self) -> Vec<(CompileJob, Option<JobSlot>)> {
        self.jobs
            .into_iter()
            .zip(self.slots.into_iter().map(OnceLock::into_inner))
            .collect()
    }

    /// Copy of the jobs and results, for when the batch is still shared.
    pub fn snapshot(&self) -> Vec<(CompileJob, Option<JobSlot>)> {
        self.jobs
            .iter()
            .cloned()
            .zip(self.slots.iter().map(|slot| slot.get().cloned()))
            .collect()
    }
}
