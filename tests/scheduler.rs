//! End-to-end scheduler tests with real worker processes.
//!
//! The `shaderfarm` binary is launched as the compile worker, so these cover
//! the full request/response cycle through the per-thread working
//! directories.

use shaderfarm::backend::PreprocessCompiler;
use shaderfarm::config::SchedulerConfig;
use shaderfarm::job::{CompileJob, CompilerEnvironment, Platform, ShaderTarget, Stage};
use shaderfarm::paths;
use shaderfarm::scheduler::{JobScheduler, JobStatus, RunOptions};
use shaderfarm::Error;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn config(root: &Path, worker_args: &[&str]) -> SchedulerConfig {
    let shaders = root.join("shaders");
    std::fs::create_dir_all(&shaders).unwrap();
    std::fs::write(shaders.join("Common.usf"), "float4 Tint;\n").unwrap();

    SchedulerConfig {
        working_root: Some(root.join("work")),
        shader_dir: shaders,
        worker_program: Some(env!("CARGO_BIN_EXE_shaderfarm").into()),
        worker_args: worker_args.iter().map(|s| s.to_string()).collect(),
        hardware_threads: Some(4),
        parallel_threshold: 1,
        response_timeout_secs: 30,
        ..Default::default()
    }
}

/// A job whose source comes inline, including the `Common.usf` fixture.
fn job(name: &str, platform: Platform) -> CompileJob {
    let source = format!("{}.usf", name);
    let text = format!("#include \"Common.usf\"\n// {}\nvoid Main() {{}}\n", name);
    CompileJob::new(
        source.clone(),
        "Main",
        ShaderTarget::new(platform, Stage::Pixel),
        CompilerEnvironment::default().with_include(source, text),
    )
}

fn code_text(report: &shaderfarm::scheduler::JobReport) -> String {
    let output = report.output.as_ref().expect("job ran");
    String::from_utf8(output.code.clone()).unwrap()
}

#[test]
fn test_mixed_local_and_remote_batch() {
    let dir = tempdir().unwrap();
    let config = config(dir.path(), &["worker"]);
    let mut scheduler = JobScheduler::new(config, Arc::new(PreprocessCompiler::new())).unwrap();

    let platforms = [Platform::Xbox360, Platform::Ps3, Platform::PcD3dSm3, Platform::PcD3dSm4];
    for i in 0..24 {
        scheduler.submit(job(&format!("Shader{}", i), platforms[i % platforms.len()]));
    }

    let report = scheduler.run_to_completion(RunOptions::default()).unwrap();

    assert!(report.success);
    assert_eq!(report.thread_count, 4);
    assert_eq!(report.count(JobStatus::Succeeded), 24);
    for job in &report.jobs {
        // Each response belongs to its own request
        let text = code_text(job);
        assert!(text.contains(&format!("// Shader{}\n", job.index)), "job {}: {}", job.index, text);
        assert!(text.contains("float4 Tint;"));
    }

    // One working directory per thread that talked to a worker
    let pid_dir = dir.path().join("work").join(std::process::id().to_string());
    assert!(pid_dir.is_dir());
}

#[test]
fn test_worker_relaunched_after_exit() {
    let dir = tempdir().unwrap();
    // Workers exit as soon as they have answered one request
    let config = SchedulerConfig {
        allow_multithreaded_compile: false,
        ..config(dir.path(), &["worker", "--idle-timeout", "0"])
    };
    let mut scheduler = JobScheduler::new(config, Arc::new(PreprocessCompiler::new())).unwrap();

    for i in 0..5 {
        scheduler.submit(job(&format!("Relaunch{}", i), Platform::Xbox360));
    }
    let report = scheduler.run_to_completion(RunOptions::default()).unwrap();

    assert!(report.success);
    for job in &report.jobs {
        assert!(code_text(job).contains(&format!("// Relaunch{}\n", job.index)));
        assert_eq!(job.thread_id, Some(0));
    }

    // The worker log lives next to the request and response files
    let thread_dir = dir
        .path()
        .join("work")
        .join(std::process::id().to_string())
        .join("0");
    assert!(thread_dir.join(paths::WORKER_LOG_FILENAME).exists());
    assert!(!thread_dir.join(paths::REQUEST_FILENAME).exists());
    assert!(!thread_dir.join(paths::RESPONSE_FILENAME).exists());
}

#[test]
fn test_failed_remote_job_stops_dispatch() {
    let dir = tempdir().unwrap();
    let config = SchedulerConfig {
        allow_multithreaded_compile: false,
        ..config(dir.path(), &["worker"])
    };
    let mut scheduler = JobScheduler::new(config, Arc::new(PreprocessCompiler::new())).unwrap();

    scheduler.submit(job("Good", Platform::Ps3));
    scheduler.submit(CompileJob::new(
        "Missing.usf",
        "Main",
        ShaderTarget::new(Platform::Ps3, Stage::Vertex),
        CompilerEnvironment::default(),
    ));
    scheduler.submit(job("Never", Platform::Ps3));

    let options = RunOptions {
        silent: true,
        ..Default::default()
    };
    let report = scheduler.run_to_completion(options).unwrap();

    assert!(!report.success);
    assert_eq!(report.first_failure, Some(1));
    assert_eq!(report.jobs[0].status(), JobStatus::Succeeded);
    assert_eq!(report.jobs[1].status(), JobStatus::Failed);
    assert_eq!(report.jobs[2].status(), JobStatus::NotStarted);
    let errors = &report.jobs[1].output.as_ref().unwrap().errors;
    assert!(errors[0].contains("Missing.usf"));
}

#[test]
fn test_unlaunchable_worker_is_fatal() {
    let dir = tempdir().unwrap();
    let config = SchedulerConfig {
        worker_program: Some(dir.path().join("no-such-worker")),
        allow_multithreaded_compile: false,
        ..config(dir.path(), &[])
    };
    let mut scheduler = JobScheduler::new(config, Arc::new(PreprocessCompiler::new())).unwrap();
    scheduler.submit(job("A", Platform::Xbox360));

    let err = scheduler.run_to_completion(RunOptions::default()).unwrap_err();
    assert!(matches!(err, Error::WorkerThread { thread_id: 0, .. }), "got {:?}", err);
    assert!(err.to_string().contains("no-such-worker"));

    // Local jobs still compile on the rebuilt pool
    scheduler.submit(job("B", Platform::PcD3dSm3));
    let report = scheduler.run_to_completion(RunOptions::default()).unwrap();
    assert!(report.success);
}
