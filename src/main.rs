//! shaderfarm - parallel shader compile-job scheduler

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};
use shaderfarm::backend::PreprocessCompiler;
use shaderfarm::cli::{Cli, Commands, CompileArgs, WorkerArgs};
use shaderfarm::config::SchedulerConfig;
use shaderfarm::logging::{self, LogConfig};
use shaderfarm::manifest::Manifest;
use shaderfarm::output::{self, OutputFormat, TableOptions};
use shaderfarm::scheduler::{JobScheduler, RunOptions};
use shaderfarm::theme;
use shaderfarm::worker::{WorkerOptions, run_worker_main};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Exit code for a batch in which some job failed to compile.
const EXIT_BATCH_FAILED: i32 = 2;

const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(10);

fn main() {
    let cli = Cli::parse();

    // Affects both owo_colors and comfy_table
    if cli.no_color {
        theme::disable_colors();
    }

    let result = match &cli.command {
        Commands::Compile(args) => cmd_compile(&cli, args),
        Commands::Worker(args) => cmd_worker(args),
        Commands::Completions(args) => {
            args.generate();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

/// Config file, then environment, then command-line flags.
fn load_config(cli: &Cli, args: &CompileArgs) -> Result<SchedulerConfig> {
    let config = match &cli.config {
        Some(path) => SchedulerConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SchedulerConfig::default(),
    };
    let mut config = config.with_env_overrides();
    args.apply_to(&mut config);
    config.validate()?;
    Ok(config)
}

fn cmd_compile(cli: &Cli, args: &CompileArgs) -> Result<()> {
    logging::init(
        LogConfig::for_cli()
            .with_level(cli.verbosity().level())
            .with_env_overrides(),
    );

    let config = load_config(cli, args)?;
    let manifest = Manifest::load(&args.manifest)?;
    let name = manifest.name().to_string();
    let jobs = manifest.into_jobs()?;

    let mut scheduler = JobScheduler::new(config, Arc::new(PreprocessCompiler::new()))
        .context("Failed to start the job scheduler")?;
    info!(batch = %name, jobs = jobs.len(), "Submitting batch");
    for job in jobs {
        scheduler.submit(job);
    }

    let report = scheduler.run_to_completion(RunOptions {
        dump_debug_artifacts: args.dump,
        silent: args.silent,
    })?;
    // Shuts down the worker processes; exit() skips destructors.
    drop(scheduler);

    let format = OutputFormat::from(args.format);
    output::print_report(&report, format, TableOptions { ascii: args.ascii });
    if format == OutputFormat::Table && !cli.quiet {
        eprintln!("{}", output::summary_line(&report));
    }

    if !report.success {
        std::process::exit(EXIT_BATCH_FAILED);
    }
    Ok(())
}

fn cmd_worker(args: &WorkerArgs) -> Result<()> {
    run_worker_main(WorkerOptions {
        working_dir: args.working_dir.clone(),
        parent_pid: args.parent_pid,
        thread_id: args.thread_id,
        idle_timeout: Duration::from_secs(args.idle_timeout),
        poll_interval: WORKER_POLL_INTERVAL,
    })
}
