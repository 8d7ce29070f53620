//! Launching worker processes.

use super::proc::Proc;
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Program and leading arguments used to start a worker.
///
/// The worker is invoked as
/// `<program> [args...] <working-dir> <parent-pid> <thread-id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// From configuration, defaulting to `<current exe> worker`.
    pub fn from_config(config: &SchedulerConfig) -> Result<Self> {
        let program = match &config.worker_program {
            Some(program) => program.clone(),
            None => std::env::current_exe().map_err(|e| {
                Error::WorkerLaunch(format!("Failed to get current executable: {}", e))
            })?,
        };
        Ok(Self::new(program, config.worker_args.clone()))
    }

    fn command(&self, working_dir: &Path, parent_pid: u32, thread_id: usize) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(working_dir)
            .arg(parent_pid.to_string())
            .arg(thread_id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
        cmd
    }
}

/// Start a worker for the channel of `thread_id`.
pub fn spawn_worker(spec: &LaunchSpec, working_dir: &Path, thread_id: usize) -> Result<Proc> {
    let parent_pid = std::process::id();
    let child = spec
        .command(working_dir, parent_pid, thread_id)
        .spawn()
        .map_err(|e| {
            Error::WorkerLaunch(format!("Failed to spawn '{}': {}", spec.program.display(), e))
        })?;

    debug!(
        thread_id,
        pid = child.id(),
        program = %spec.program.display(),
        "Launched compile worker"
    );
    Ok(Proc::from_child(child))
}
