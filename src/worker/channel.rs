//! Per-thread binding to a worker process.
//!
//! Each scheduler thread that compiles remote jobs owns one [`WorkerChannel`].
//! The channel has a private working directory, `<root>/<pid>/<thread id>`,
//! and talks to its worker through two files in it: the request
//! (`WorkerInput.bin`) and the response (`WorkerOutput.bin`). Both sides write
//! to a temporary name and rename, so a file that exists is complete.

use super::proc::Proc;
use super::protocol::{WorkerRequest, WorkerResponse};
use super::signals::TerminationReason;
use super::spawn::{LaunchSpec, spawn_worker};
use crate::backend::CompileInput;
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::job::CompileOutput;
use crate::paths::{self, REQUEST_FILENAME, RESPONSE_FILENAME};
use nix::unistd::Pid;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// How long a worker gets to exit on SIGTERM before it is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Channel settings shared by every thread of a pool.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub working_root: PathBuf,
    pub launch: LaunchSpec,
    pub shader_dir: PathBuf,
    pub fixture_extensions: Vec<String>,
    pub max_relaunches: u32,
    pub poll_interval: Duration,
    pub response_timeout: Duration,
}

impl ChannelSettings {
    pub fn from_config(config: &SchedulerConfig) -> Result<Self> {
        Ok(Self {
            working_root: config.working_root(),
            launch: LaunchSpec::from_config(config)?,
            shader_dir: paths::expand_tilde(&config.shader_dir),
            fixture_extensions: config.fixture_extensions.clone(),
            max_relaunches: config.max_relaunches,
            poll_interval: config.poll_interval(),
            response_timeout: config.response_timeout(),
        })
    }

    /// Launches a single job may use before the worker is declared deadlocked.
    fn launch_budget(&self) -> u32 {
        self.max_relaunches.saturating_add(1)
    }
}

pub struct WorkerChannel {
    thread_id: usize,
    working_dir: PathBuf,
    settings: ChannelSettings,
    process: Option<Proc>,
    launched_once: bool,
    launch_count: usize,
    fixtures_copied: bool,
}

impl WorkerChannel {
    /// Create the working directory and clear out anything a previous
    /// channel with the same directory left behind.
    pub fn new(thread_id: usize, settings: ChannelSettings) -> Result<Self> {
        let working_dir =
            paths::working_directory(&settings.working_root, std::process::id(), thread_id);
        std::fs::create_dir_all(&working_dir)?;

        for name in [REQUEST_FILENAME, RESPONSE_FILENAME] {
            let path = working_dir.join(name);
            remove_if_exists(&path)?;
            remove_if_exists(&paths::staging_path(&path))?;
        }

        debug!(thread_id, dir = %working_dir.display(), "Created worker channel");
        Ok(Self {
            thread_id,
            working_dir,
            settings,
            process: None,
            launched_once: false,
            launch_count: 0,
            fixtures_copied: false,
        })
    }

    pub fn thread_id(&self) -> usize {
        self.thread_id
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn request_path(&self) -> PathBuf {
        self.working_dir.join(REQUEST_FILENAME)
    }

    pub fn response_path(&self) -> PathBuf {
        self.working_dir.join(RESPONSE_FILENAME)
    }

    /// Whether a worker has ever been started for this channel.
    pub fn launched_once(&self) -> bool {
        self.launched_once
    }

    /// Total worker launches over the channel's lifetime.
    pub fn launch_count(&self) -> usize {
        self.launch_count
    }

    pub fn fixtures_copied(&self) -> bool {
        self.fixtures_copied
    }

    /// Run one job through the worker and wait for its result.
    ///
    /// Every error returned here is fatal for the run. A job that fails to
    /// compile comes back as `Ok` with `succeeded == false`.
    #[instrument(level = "debug", skip_all, fields(thread_id = self.thread_id, source = %input.source))]
    pub fn compile(
        &mut self,
        input: &CompileInput,
        dump_dir: Option<&Path>,
    ) -> Result<CompileOutput> {
        let kind = input.job_kind();
        if kind.needs_shared_fixtures() && !self.fixtures_copied {
            self.copy_fixtures()?;
        }

        // A response left over from a killed worker must not answer this job
        let response_path = self.response_path();
        remove_if_exists(&response_path)?;
        remove_if_exists(&paths::staging_path(&response_path))?;

        let request = WorkerRequest::new(input.clone(), dump_dir);
        write_atomically(&self.request_path(), &request.encode())?;

        let label = format!("{}:{} ({})", input.source, input.entry_point, input.target.platform);
        let data = self.wait_for_response(&label)?;

        match WorkerResponse::decode(&data)? {
            WorkerResponse::Fatal { message } => Err(Error::WorkerReported {
                thread_id: self.thread_id,
                message,
            }),
            WorkerResponse::Completed {
                kind: answered, ..
            } if answered != kind => Err(Error::Protocol(format!(
                "expected a {} response, got {}",
                kind, answered
            ))),
            WorkerResponse::Completed { output, .. } => Ok(output),
        }
    }

    /// Poll for the response, (re)launching the worker when none is alive.
    fn wait_for_response(&mut self, job: &str) -> Result<Vec<u8>> {
        let mut launches = 0u32;
        let mut waiting_since = Instant::now();

        loop {
            if let Some(data) = self.take_response()? {
                return Ok(data);
            }

            let alive = self.process.as_mut().is_some_and(Proc::is_running);
            if !alive {
                // The worker may have written its response and exited
                // between the read above and the liveness check.
                if let Some(data) = self.take_response()? {
                    return Ok(data);
                }

                let last_exit = self.process.as_mut().map(Proc::termination);
                if launches >= self.settings.launch_budget() {
                    return Err(self.deadlock(job, launches, last_exit));
                }
                if let Some(reason) = last_exit {
                    warn!(
                        thread_id = self.thread_id,
                        job,
                        %reason,
                        "Compile worker exited without responding, relaunching"
                    );
                }

                self.launch()?;
                launches += 1;
                waiting_since = Instant::now();
            } else if waiting_since.elapsed() >= self.settings.response_timeout {
                if let Some(process) = self.process.as_mut() {
                    let _ = process.kill();
                }
                return Err(Error::WorkerDeadlock {
                    thread_id: self.thread_id,
                    job: job.to_string(),
                    reason: format!(
                        "no response after {:?}, worker killed",
                        self.settings.response_timeout
                    ),
                });
            }

            std::thread::sleep(self.settings.poll_interval);
        }
    }

    fn deadlock(&self, job: &str, launches: u32, last_exit: Option<TerminationReason>) -> Error {
        let reason = match last_exit {
            Some(reason) => format!(
                "worker {} without writing a response after {} launch(es)",
                reason, launches
            ),
            None => format!("no response after {} launch(es)", launches),
        };
        Error::WorkerDeadlock {
            thread_id: self.thread_id,
            job: job.to_string(),
            reason,
        }
    }

    fn launch(&mut self) -> Result<()> {
        let process = spawn_worker(&self.settings.launch, &self.working_dir, self.thread_id)?;
        if self.launched_once {
            info!(thread_id = self.thread_id, pid = process.pid(), "Relaunched compile worker");
        }
        self.process = Some(process);
        self.launched_once = true;
        self.launch_count += 1;
        Ok(())
    }

    /// Read and delete the response file, if it is there.
    fn take_response(&self) -> Result<Option<Vec<u8>>> {
        let path = self.response_path();
        match std::fs::read(&path) {
            Ok(data) => {
                std::fs::remove_file(&path)?;
                Ok(Some(data))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Copy the shared shader files next to the request, once per channel.
    fn copy_fixtures(&mut self) -> Result<()> {
        let dir = &self.settings.shader_dir;
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(dir = %dir.display(), "Shader directory not found, no fixtures copied");
                self.fixtures_copied = true;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let mut copied = 0usize;
        for entry in entries {
            let path = entry?.path();
            let wanted = path.is_file()
                && path.extension().and_then(|e| e.to_str()).is_some_and(|ext| {
                    self.settings
                        .fixture_extensions
                        .iter()
                        .any(|want| want.eq_ignore_ascii_case(ext))
                });
            if let (true, Some(name)) = (wanted, path.file_name()) {
                std::fs::copy(&path, self.working_dir.join(name))?;
                copied += 1;
            }
        }

        debug!(thread_id = self.thread_id, copied, "Copied shared shader files");
        self.fixtures_copied = true;
        Ok(())
    }

    /// Stop the worker process, if one is running.
    pub fn shutdown(&mut self) {
        if let Some(mut process) = self.process.take() {
            debug!(thread_id = self.thread_id, pid = process.pid(), "Stopping compile worker");
            let _ = process.stop(SHUTDOWN_GRACE);
        }
    }
}

impl Drop for WorkerChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Write `data` to a temporary sibling of `path`, then rename it into place.
pub fn write_atomically(path: &Path, data: &[u8]) -> Result<()> {
    let staging = paths::staging_path(path);
    std::fs::write(&staging, data)?;
    std::fs::rename(&staging, path)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Whether a process with this id exists.
pub fn process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    nix::sys::signal::kill(Pid::from_raw(raw), None).is_ok()
}

/// Remove working directories left behind by scheduler processes that are no
/// longer running. Returns how many were removed.
pub fn clean_stale_working_dirs(root: &Path) -> Result<usize> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };
        if pid == std::process::id() || process_alive(pid) {
            continue;
        }
        match std::fs::remove_dir_all(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => warn!(pid, error = %e, "Failed to remove stale working directory"),
        }
    }
    Ok(removed)
}
