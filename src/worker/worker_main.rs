//! Worker process main loop.
//!
//! Runs when `shaderfarm worker <dir> <parent-pid> <thread-id>` is invoked.
//! The worker waits for `WorkerInput.bin` in its directory, compiles it and
//! answers with `WorkerOutput.bin`, until the parent process goes away or no
//! request has arrived for the idle timeout.
//!
//! The request file is only removed once its response is ready, so a worker
//! that dies mid-compile leaves the job for its relaunched successor. Errors
//! and panics are answered with a `CriticalError` fatal response.

use super::channel::{process_alive, write_atomically};
use super::protocol::{WorkerRequest, WorkerResponse};
use crate::backend::{CompileContext, PreprocessCompiler, ShaderCompiler};
use crate::error::{Error, Result};
use crate::logging::{self, LogConfig};
use crate::paths::{REQUEST_FILENAME, RESPONSE_FILENAME};
use crate::scheduler::panic_message;
use std::io::ErrorKind;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Time for the parent to pick up a fatal response before the exit is seen.
const FATAL_EXIT_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub working_dir: PathBuf,
    pub parent_pid: u32,
    pub thread_id: usize,
    pub idle_timeout: Duration,
    pub poll_interval: Duration,
}

/// Why the loop stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    ParentGone,
    IdleTimeout,
}

/// Serve requests until the parent exits or the worker idles out.
pub fn serve(opts: &WorkerOptions, compiler: &dyn ShaderCompiler) -> Result<WorkerExit> {
    let request_path = opts.working_dir.join(REQUEST_FILENAME);
    let response_path = opts.working_dir.join(RESPONSE_FILENAME);
    let mut idle_since = Instant::now();

    loop {
        match std::fs::read(&request_path) {
            Ok(data) => {
                let response = handle_request(&data, opts, compiler)?;
                std::fs::remove_file(&request_path)?;
                write_atomically(&response_path, &response.encode())?;
                idle_since = Instant::now();
                continue;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if !process_alive(opts.parent_pid) {
            return Ok(WorkerExit::ParentGone);
        }
        if idle_since.elapsed() >= opts.idle_timeout {
            return Ok(WorkerExit::IdleTimeout);
        }
        std::thread::sleep(opts.poll_interval);
    }
}

/// [`serve`] with a panic turned into [`Error::ThreadPanicked`].
pub fn serve_guarded(opts: &WorkerOptions, compiler: &dyn ShaderCompiler) -> Result<WorkerExit> {
    catch_unwind(AssertUnwindSafe(|| serve(opts, compiler))).unwrap_or_else(|payload| {
        Err(Error::ThreadPanicked {
            thread_id: opts.thread_id,
            message: panic_message(payload.as_ref()),
        })
    })
}

fn handle_request(
    data: &[u8],
    opts: &WorkerOptions,
    compiler: &dyn ShaderCompiler,
) -> Result<WorkerResponse> {
    let request = WorkerRequest::decode(data)?;
    debug!(
        kind = %request.kind,
        source = %request.input.source,
        entry = %request.input.entry_point,
        "Compiling"
    );

    let ctx = CompileContext::new(opts.thread_id, &opts.working_dir)
        .with_dump_dir(request.dump_dir.clone());
    let output = compiler.compile(&request.input, &ctx)?;
    Ok(WorkerResponse::completed(request.kind, output))
}

/// Serve until done and return the process exit code.
fn serve_to_exit(opts: &WorkerOptions, compiler: &dyn ShaderCompiler) -> i32 {
    match serve_guarded(opts, compiler) {
        Ok(exit) => {
            info!(?exit, "Compile worker exiting");
            0
        }
        Err(e) => {
            error!(error = %e, "Compile worker failed");
            let response = WorkerResponse::fatal(format!("CriticalError: {}", e));
            let path = opts.working_dir.join(RESPONSE_FILENAME);
            if let Err(write_err) = write_atomically(&path, &response.encode()) {
                error!(error = %write_err, "Failed to write fatal response");
            }
            std::thread::sleep(FATAL_EXIT_DELAY);
            1
        }
    }
}

/// Entry point of the `worker` subcommand. Never returns.
pub fn run_worker_main(opts: WorkerOptions) -> ! {
    logging::init(LogConfig::for_worker(&opts.working_dir));
    info!(
        parent_pid = opts.parent_pid,
        thread_id = opts.thread_id,
        dir = %opts.working_dir.display(),
        "Compile worker started"
    );

    std::process::exit(serve_to_exit(&opts, &PreprocessCompiler::new()))
}
