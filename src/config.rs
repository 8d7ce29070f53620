//! Scheduler configuration.
//!
//! Loaded from an optional JSON file, then adjusted by environment variables
//! and finally by CLI flags. Every field has a default, so an empty object
//! (or no file at all) is a valid configuration.
//!
//! # Environment Variables
//!
//! - `SHADERFARM_ALLOW_MULTITHREADED` - `true`/`false`
//! - `SHADERFARM_RESERVED_THREADS` - hardware threads left unused
//! - `SHADERFARM_PARALLEL_THRESHOLD` - minimum queue size for multithreading
//! - `SHADERFARM_USE_ALL_CORES` - any value forces reserved threads to 0
//! - `SHADERFARM_WORKING_ROOT` - root of the per-thread worker directories

use crate::error::{Error, Result};
use crate::job::Platform;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_true() -> bool {
    true
}

fn default_parallel_threshold() -> usize {
    4
}

fn default_remote_platforms() -> Vec<Platform> {
    vec![Platform::Xbox360, Platform::Ps3]
}

fn default_shader_dir() -> PathBuf {
    PathBuf::from("shaders")
}

fn default_fixture_extensions() -> Vec<String> {
    vec!["usf".to_string(), "ush".to_string()]
}

fn default_game_name() -> String {
    "shaderfarm".to_string()
}

fn default_worker_args() -> Vec<String> {
    vec!["worker".to_string()]
}

fn default_max_relaunches() -> u32 {
    1
}

fn default_response_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    10
}

/// Configuration for [`JobScheduler`](crate::scheduler::JobScheduler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Enables the thread pool at all.
    #[serde(default = "default_true")]
    pub allow_multithreaded_compile: bool,
    /// Hardware threads left unused by compiling.
    pub reserved_thread_count: usize,
    /// Batches smaller than this run on the calling thread only.
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,
    /// Forces single-threaded compiles and writes debug dumps.
    pub dump_debug_artifacts: bool,
    /// Overrides the detected hardware thread count.
    pub hardware_threads: Option<usize>,
    /// Platforms compiled through worker processes.
    #[serde(default = "default_remote_platforms")]
    pub remote_platforms: Vec<Platform>,
    /// Directory holding the shared shader fixtures.
    #[serde(default = "default_shader_dir")]
    pub shader_dir: PathBuf,
    /// Extensions of the files copied out of `shader_dir`.
    #[serde(default = "default_fixture_extensions")]
    pub fixture_extensions: Vec<String>,
    /// Root of the per-thread worker directories.
    pub working_root: Option<PathBuf>,
    /// Root of debug dumps.
    pub dump_dir: Option<PathBuf>,
    /// Context name sent with every worker request.
    #[serde(default = "default_game_name")]
    pub game_name: String,
    /// Worker executable, current executable when unset.
    pub worker_program: Option<PathBuf>,
    /// Arguments placed before the positional worker arguments.
    #[serde(default = "default_worker_args")]
    pub worker_args: Vec<String>,
    /// Relaunches allowed per job when a worker dies without responding.
    #[serde(default = "default_max_relaunches")]
    pub max_relaunches: u32,
    /// Upper bound on the wait for one response.
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,
    /// Interval for all polling loops.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            allow_multithreaded_compile: true,
            reserved_thread_count: 0,
            parallel_threshold: default_parallel_threshold(),
            dump_debug_artifacts: false,
            hardware_threads: None,
            remote_platforms: default_remote_platforms(),
            shader_dir: default_shader_dir(),
            fixture_extensions: default_fixture_extensions(),
            working_root: None,
            dump_dir: None,
            game_name: default_game_name(),
            worker_program: None,
            worker_args: default_worker_args(),
            max_relaunches: default_max_relaunches(),
            response_timeout_secs: default_response_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl SchedulerConfig {
    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.hardware_threads == Some(0) {
            return Err(Error::Config("hardware_threads must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be at least 1".into()));
        }
        if self.response_timeout_secs == 0 {
            return Err(Error::Config(
                "response_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Apply environment variable overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(value) = std::env::var("SHADERFARM_ALLOW_MULTITHREADED")
            && let Some(allow) = parse_bool(&value)
        {
            self.allow_multithreaded_compile = allow;
        }
        if let Ok(value) = std::env::var("SHADERFARM_RESERVED_THREADS")
            && let Ok(reserved) = value.trim().parse()
        {
            self.reserved_thread_count = reserved;
        }
        if let Ok(value) = std::env::var("SHADERFARM_PARALLEL_THRESHOLD")
            && let Ok(threshold) = value.trim().parse()
        {
            self.parallel_threshold = threshold;
        }
        if std::env::var_os("SHADERFARM_USE_ALL_CORES").is_some() {
            self.reserved_thread_count = 0;
        }
        if let Ok(root) = std::env::var("SHADERFARM_WORKING_ROOT") {
            self.working_root = Some(PathBuf::from(root));
        }
        self
    }

    /// Hardware threads available to compiling.
    pub fn hardware_thread_count(&self) -> usize {
        self.hardware_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Threads to use for a batch of `queue_len` jobs.
    ///
    /// Small batches, debug dumps and disabled multithreading all run on the
    /// calling thread alone, whatever the hardware offers.
    pub fn desired_thread_count(&self, queue_len: usize, dump_debug_artifacts: bool) -> usize {
        if !self.allow_multithreaded_compile
            || dump_debug_artifacts
            || self.dump_debug_artifacts
            || queue_len < self.parallel_threshold
        {
            return 1;
        }
        self.hardware_thread_count()
            .saturating_sub(self.reserved_thread_count)
            .max(1)
    }

    /// Whether `platform` is compiled through a worker process.
    pub fn is_remote(&self, platform: Platform) -> bool {
        self.remote_platforms.contains(&platform)
    }

    pub fn working_root(&self) -> PathBuf {
        self.working_root
            .as_ref()
            .map(paths::expand_tilde)
            .unwrap_or_else(paths::default_working_root)
    }

    pub fn dump_root(&self) -> PathBuf {
        self.dump_dir
            .as_ref()
            .map(paths::expand_tilde)
            .unwrap_or_else(paths::default_dump_dir)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
