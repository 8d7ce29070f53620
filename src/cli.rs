//! Command-line interface definitions using clap.

use crate::config::SchedulerConfig;
use crate::output::OutputFormat;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

/// Parallel shader compile-job scheduler.
#[derive(Parser, Debug)]
#[command(name = "shaderfarm")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Scheduler configuration file (JSON).
    #[arg(long, global = true, env = "SHADERFARM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output (-v for info, -vv for debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output.
    #[arg(long, global = true, env = "NO_COLOR", value_parser = clap::builder::BoolishValueParser::new())]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile every job of a batch manifest.
    Compile(CompileArgs),

    /// Serve compile requests for one scheduler thread (launched by the scheduler).
    #[command(hide = true)]
    Worker(WorkerArgs),

    /// Generate shell completions.
    Completions(CompletionsArgs),
}

/// Arguments for shell completions.
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate and print completions to stdout.
    pub fn generate(&self) {
        clap_complete::generate(
            self.shell,
            &mut Cli::command(),
            "shaderfarm",
            &mut std::io::stdout(),
        );
    }
}

/// Arguments for the compile command.
#[derive(Parser, Debug)]
pub struct CompileArgs {
    /// Batch manifest to compile.
    pub manifest: PathBuf,

    /// Override the detected hardware thread count.
    #[arg(short = 'j', long)]
    pub threads: Option<usize>,

    /// Hardware threads to leave unused.
    #[arg(long)]
    pub reserved: Option<usize>,

    /// Minimum batch size that uses the thread pool.
    #[arg(long)]
    pub threshold: Option<usize>,

    /// Compile on the calling thread only.
    #[arg(long)]
    pub single_threaded: bool,

    /// Use every hardware thread (ignores --reserved).
    #[arg(long, conflicts_with = "reserved")]
    pub use_all_cores: bool,

    /// Write debug artifacts (forces a single thread).
    #[arg(long)]
    pub dump: bool,

    /// Directory for debug artifacts.
    #[arg(long, requires = "dump")]
    pub dump_dir: Option<PathBuf>,

    /// Don't log individual job failures.
    #[arg(long)]
    pub silent: bool,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = OutputFormatArg::Table)]
    pub format: OutputFormatArg,

    /// Use ASCII table borders instead of Unicode.
    #[arg(long)]
    pub ascii: bool,
}

impl CompileArgs {
    /// Layer these flags over `config`.
    pub fn apply_to(&self, config: &mut SchedulerConfig) {
        if let Some(threads) = self.threads {
            config.hardware_threads = Some(threads);
        }
        if let Some(reserved) = self.reserved {
            config.reserved_thread_count = reserved;
        }
        if self.use_all_cores {
            config.reserved_thread_count = 0;
        }
        if let Some(threshold) = self.threshold {
            config.parallel_threshold = threshold;
        }
        if self.single_threaded {
            config.allow_multithreaded_compile = false;
        }
        if let Some(dir) = &self.dump_dir {
            config.dump_dir = Some(dir.clone());
        }
    }
}

/// Positional arguments a worker is launched with.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Working directory shared with the parent thread.
    pub working_dir: PathBuf,

    /// Process id of the scheduler.
    pub parent_pid: u32,

    /// Scheduler thread this worker serves.
    pub thread_id: usize,

    /// Exit after this many seconds without a request.
    #[arg(long, env = "SHADERFARM_WORKER_IDLE_SECS", default_value_t = 20)]
    pub idle_timeout: u64,
}

/// Output format argument.
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum OutputFormatArg {
    #[default]
    Table,
    Json,
    Plain,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Table => OutputFormat::Table,
            OutputFormatArg::Json => OutputFormat::Json,
            OutputFormatArg::Plain => OutputFormat::Plain,
        }
    }
}

/// Verbosity level derived from -v/-q flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// -q: errors only.
    Quiet,
    /// Default: warnings and results.
    Normal,
    /// -v: scheduler progress.
    Info,
    /// -vv: per-job and worker launch detail.
    Debug,
}

impl From<u8> for Verbosity {
    fn from(count: u8) -> Self {
        match count {
            0 => Verbosity::Normal,
            1 => Verbosity::Info,
            _ => Verbosity::Debug,
        }
    }
}

impl Cli {
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            Verbosity::from(self.verbose)
        }
    }
}

impl Verbosity {
    pub fn level(self) -> tracing::Level {
        match self {
            Verbosity::Quiet => tracing::Level::ERROR,
            Verbosity::Normal => tracing::Level::WARN,
            Verbosity::Info => tracing::Level::INFO,
            Verbosity::Debug => tracing::Level::DEBUG,
        }
    }
}
