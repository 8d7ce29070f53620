//! Pool threads and the job loop they run.

use super::state::{RunBatch, SharedRunState};
use crate::backend::{Backend, CompileContext, CompileInput, ShaderCompiler};
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::job::{CompileJob, CompileOutput};
use crate::worker::{ChannelSettings, WorkerChannel};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, error, warn};

/// Everything the pool threads share with the scheduler.
pub(crate) struct Shared {
    pub state: SharedRunState,
    batch: Mutex<Option<Arc<RunBatch>>>,
    pub compiler: Arc<dyn ShaderCompiler>,
    pub config: SchedulerConfig,
    pub channel_settings: ChannelSettings,
}

impl Shared {
    pub fn new(
        config: SchedulerConfig,
        compiler: Arc<dyn ShaderCompiler>,
        channel_settings: ChannelSettings,
    ) -> Self {
        Self {
            state: SharedRunState::default(),
            batch: Mutex::new(None),
            compiler,
            config,
            channel_settings,
        }
    }

    pub fn publish(&self, batch: Arc<RunBatch>) {
        *self.batch.lock().unwrap_or_else(PoisonError::into_inner) = Some(batch);
    }

    pub fn current_batch(&self) -> Option<Arc<RunBatch>> {
        self.batch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn take_batch(&self) -> Option<Arc<RunBatch>> {
        self.batch.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Activation counter and captured failure of one pool thread.
#[derive(Debug, Default)]
pub(crate) struct ThreadHealth {
    activation: AtomicUsize,
    failure: Mutex<Option<Error>>,
    terminated: AtomicBool,
}

impl ThreadHealth {
    pub fn activate(&self) {
        self.activation.fetch_add(1, Ordering::AcqRel);
    }

    fn deactivate(&self) {
        self.activation.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn is_busy(&self) -> bool {
        self.activation.load(Ordering::Acquire) > 0
    }

    /// Record the error that killed the thread. The message is stored before
    /// `terminated` is published.
    fn capture(&self, error: Error) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
        self.terminated.store(true, Ordering::Release);
    }

    pub fn has_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub fn take_failure(&self) -> Option<Error> {
        if !self.has_terminated() {
            return None;
        }
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// A non-primary pool thread.
pub(crate) struct ThreadWorker {
    pub id: usize,
    pub health: Arc<ThreadHealth>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadWorker {
    pub fn spawn(id: usize, shared: Arc<Shared>) -> Result<Self> {
        let health = Arc::new(ThreadHealth::default());
        let thread_health = Arc::clone(&health);

        let handle = std::thread::Builder::new()
            .name(format!("shader-compile-{}", id))
            .spawn(move || thread_main(id, &shared, &thread_health))
            .map_err(|e| Error::WorkerThread {
                thread_id: id,
                message: format!("failed to start thread: {}", e),
            })?;

        Ok(Self {
            id,
            health,
            handle: Some(handle),
        })
    }

    /// Wait for the thread to exit. The kill flag must already be set.
    pub fn join(&mut self) -> Option<Error> {
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(()) => None,
            Err(payload) => Some(Error::ThreadPanicked {
                thread_id: self.id,
                message: panic_message(payload.as_ref()),
            }),
        }
    }
}

/// Compiles jobs for one thread, owning that thread's worker channel.
pub(crate) struct Executor {
    thread_id: usize,
    shared: Arc<Shared>,
    channel: Option<WorkerChannel>,
}

impl Executor {
    pub fn new(thread_id: usize, shared: Arc<Shared>) -> Self {
        Self {
            thread_id,
            shared,
            channel: None,
        }
    }

    pub fn thread_id(&self) -> usize {
        self.thread_id
    }

    /// Compile one job, in-process or through this thread's worker.
    pub fn execute(&mut self, job: &CompileJob, dump: bool) -> Result<CompileOutput> {
        let config = &self.shared.config;
        let input = CompileInput::from_job(job, &config.game_name);
        let dump_dir = dump.then(|| config.dump_root().join(job.target.platform.as_str()));
        let ctx = CompileContext::new(self.thread_id, &config.shader_dir).with_dump_dir(dump_dir);

        let mut backend = if config.is_remote(job.target.platform) {
            let channel = match self.channel.take() {
                Some(channel) => channel,
                None => WorkerChannel::new(self.thread_id, self.shared.channel_settings.clone())?,
            };
            Backend::WorkerProcess(self.channel.insert(channel))
        } else {
            Backend::InProcess(self.shared.compiler.as_ref())
        };

        backend.compile(&input, &ctx)
    }
}

/// Claim and run jobs until the queue is drained, a job fails or the pool
/// is killed.
pub(crate) fn run_job_loop(shared: &Shared, batch: &RunBatch, executor: &mut Executor) -> Result<()> {
    loop {
        if shared.state.killed() {
            return Ok(());
        }
        let index = shared.state.claim();
        if index >= batch.len() || shared.state.error_set() {
            return Ok(());
        }
        let Some(job) = batch.job(index) else {
            return Ok(());
        };

        let output = executor.execute(job, batch.dump_debug_artifacts)?;
        let succeeded = output.succeeded;
        if !succeeded && !batch.silent {
            warn!(
                thread_id = executor.thread_id(),
                index,
                job = %job.label(),
                errors = %output.errors.join("; "),
                "Shader compile failed"
            );
        }
        batch.store(index, output, executor.thread_id());

        if !succeeded {
            shared.state.record_failure(index);
            return Ok(());
        }
    }
}

/// Give a thread-less error the id of the thread it happened on.
pub(crate) fn attribute(error: Error, thread_id: usize) -> Error {
    if error.thread_id().is_some() {
        return error;
    }
    Error::WorkerThread {
        thread_id,
        message: error.to_string(),
    }
}

/// Run the job loop behind a panic boundary.
pub(crate) fn run_guarded(shared: &Shared, batch: &RunBatch, executor: &mut Executor) -> Result<()> {
    let thread_id = executor.thread_id();
    match catch_unwind(AssertUnwindSafe(|| run_job_loop(shared, batch, executor))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(attribute(e, thread_id)),
        Err(payload) => Err(Error::ThreadPanicked {
            thread_id,
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn thread_main(id: usize, shared: &Arc<Shared>, health: &ThreadHealth) {
    let mut executor = Executor::new(id, Arc::clone(shared));
    let poll = shared.config.poll_interval();

    loop {
        if shared.state.killed() {
            debug!(thread_id = id, "Shader compiling thread exiting");
            return;
        }
        if !health.is_busy() {
            std::thread::sleep(poll);
            continue;
        }

        let result = match shared.current_batch() {
            Some(batch) => run_guarded(shared, &batch, &mut executor),
            None => Ok(()),
        };

        if let Err(e) = result {
            error!(thread_id = id, error = %e, "Shader compiling thread failed");
            shared.state.abort();
            health.capture(e);
            health.deactivate();
            return;
        }
        health.deactivate();
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
