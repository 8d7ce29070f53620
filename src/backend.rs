//! Compiler backends.
//!
//! A job is compiled either in-process by a [`ShaderCompiler`] or handed to an
//! external worker process through the calling thread's
//! [`WorkerChannel`](crate::worker::WorkerChannel). [`Backend`] hides which of
//! the two is used, so the scheduler's job loop stays the same for both.
//!
//! [`PreprocessCompiler`] is the reference compiler. It runs both in-process
//! and inside `shaderfarm worker`: it expands includes and definitions,
//! checks the entry point and reports a few statistics. It does not generate
//! any real bytecode.

use crate::error::Result;
use crate::job::{
    CompileJob, CompileOutput, CompilerEnvironment, CompilerFlag, JobKind, ShaderTarget,
};
use crate::worker::WorkerChannel;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Nested `#include` depth at which expansion gives up.
pub const MAX_INCLUDE_DEPTH: usize = 32;

/// Total `#include` expansions allowed for one job.
pub const MAX_INCLUDE_EXPANSIONS: usize = 4096;

/// Size of preprocessed output at which expansion gives up.
pub const MAX_EXPANDED_BYTES: usize = 16 * 1024 * 1024;

/// Everything a compiler needs to know about one job.
///
/// This is also the payload of a worker request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileInput {
    pub source: String,
    pub entry_point: String,
    pub target: ShaderTarget,
    pub environment: CompilerEnvironment,
    /// Context name the job is compiled for.
    pub game_name: String,
}

impl CompileInput {
    pub fn from_job(job: &CompileJob, game_name: &str) -> Self {
        Self {
            source: job.source.clone(),
            entry_point: job.entry_point.clone(),
            target: job.target,
            environment: job.environment.clone(),
            game_name: game_name.to_string(),
        }
    }

    pub fn job_kind(&self) -> JobKind {
        self.target.platform.job_kind()
    }
}

/// Where and on whose behalf a compile runs.
#[derive(Debug, Clone)]
pub struct CompileContext {
    /// Scheduler thread (or worker process thread id) doing the compile.
    pub thread_id: usize,
    /// Directory searched for sources and includes not found among the blobs.
    pub search_dir: PathBuf,
    /// Debug dump directory, when dumping is enabled.
    pub dump_dir: Option<PathBuf>,
}

impl CompileContext {
    pub fn new(thread_id: usize, search_dir: impl Into<PathBuf>) -> Self {
        Self {
            thread_id,
            search_dir: search_dir.into(),
            dump_dir: None,
        }
    }

    pub fn with_dump_dir(mut self, dump_dir: Option<PathBuf>) -> Self {
        self.dump_dir = dump_dir;
        self
    }
}

/// Compiles one job.
///
/// `Err` means the infrastructure failed and aborts the run.
/// A job that does not compile returns `Ok` with `succeeded == false`.
pub trait ShaderCompiler: Send + Sync {
    fn compile(&self, input: &CompileInput, ctx: &CompileContext) -> Result<CompileOutput>;
}

/// Where one job is compiled.
pub enum Backend<'a> {
    /// Directly on the calling thread.
    InProcess(&'a dyn ShaderCompiler),
    /// Through the calling thread's worker process.
    WorkerProcess(&'a mut WorkerChannel),
}

impl Backend<'_> {
    pub fn compile(&mut self, input: &CompileInput, ctx: &CompileContext) -> Result<CompileOutput> {
        match self {
            Backend::InProcess(compiler) => compiler.compile(input, ctx),
            Backend::WorkerProcess(channel) => channel.compile(input, ctx.dump_dir.as_deref()),
        }
    }
}

/// Reference compiler: include and definition expansion plus entry point
/// validation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreprocessCompiler;

impl PreprocessCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl ShaderCompiler for PreprocessCompiler {
    #[instrument(level = "debug", skip_all, fields(source = %input.source, entry = %input.entry_point))]
    fn compile(&self, input: &CompileInput, ctx: &CompileContext) -> Result<CompileOutput> {
        let Some(text) = resolve_source(&input.source, &input.environment, &ctx.search_dir) else {
            return Ok(CompileOutput::failure(format!(
                "Couldn't find source file '{}'",
                input.source
            )));
        };

        let mut expander = Expander {
            blobs: &input.environment.includes,
            search_dir: &ctx.search_dir,
            expanded_includes: 0,
            out: String::new(),
        };
        for (name, value) in &input.environment.definitions {
            expander.out.push_str(&format!("#define {} {}\n", name, value));
        }
        if let Err(message) = expander.expand(&text, &input.source, 0) {
            return Ok(CompileOutput::failure(message));
        }
        let expanded = expander.out;

        let skip_validation = input
            .environment
            .flags
            .contains(&CompilerFlag::SkipValidation);
        if !skip_validation && !contains_identifier(&expanded, &input.entry_point) {
            return Ok(CompileOutput::failure(format!(
                "{}: entry point '{}' not found",
                input.source, input.entry_point
            )));
        }

        if let Some(dump_dir) = &ctx.dump_dir {
            std::fs::create_dir_all(dump_dir)?;
            let dump_path = dump_dir.join(format!("{}.pre.txt", input.entry_point));
            std::fs::write(&dump_path, &expanded)?;
            debug!(path = %dump_path.display(), "Wrote preprocessed dump");
        }

        let line_count = expanded.lines().count();
        let instruction_count = expanded
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .count();

        let parameters = BTreeMap::from([
            ("entry".to_string(), input.entry_point.clone()),
            ("platform".to_string(), input.target.platform.to_string()),
            ("stage".to_string(), input.target.stage.to_string()),
            (
                "includes".to_string(),
                expander.expanded_includes.to_string(),
            ),
            ("lines".to_string(), line_count.to_string()),
        ]);

        Ok(CompileOutput {
            succeeded: true,
            code: expanded.into_bytes(),
            parameters,
            errors: Vec::new(),
            instruction_count: u32::try_from(instruction_count).unwrap_or(u32::MAX),
        })
    }
}

/// Look the source up among the include blobs, then the search directory,
/// then as a plain path.
fn resolve_source(source: &str, env: &CompilerEnvironment, search_dir: &Path) -> Option<String> {
    if let Some(blob) = env.includes.get(source) {
        return Some(blob.clone());
    }
    std::fs::read_to_string(search_dir.join(source))
        .or_else(|_| std::fs::read_to_string(source))
        .ok()
}

struct Expander<'a> {
    blobs: &'a BTreeMap<String, String>,
    search_dir: &'a Path,
    expanded_includes: usize,
    out: String,
}

impl Expander<'_> {
    fn expand(&mut self, text: &str, file: &str, depth: usize) -> std::result::Result<(), String> {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(format!(
                "{}: include depth exceeds {}",
                file, MAX_INCLUDE_DEPTH
            ));
        }

        for line in text.lines() {
            if self.out.len() > MAX_EXPANDED_BYTES {
                return Err(format!(
                    "{}: preprocessed output exceeds {} bytes",
                    file, MAX_EXPANDED_BYTES
                ));
            }
            let Some(name) = include_target(line) else {
                self.out.push_str(line);
                self.out.push('\n');
                continue;
            };
            if self.expanded_includes >= MAX_INCLUDE_EXPANSIONS {
                return Err(format!(
                    "{}: more than {} includes expanded",
                    file, MAX_INCLUDE_EXPANSIONS
                ));
            }

            let content = match self.blobs.get(name) {
                Some(blob) => blob.clone(),
                None => std::fs::read_to_string(self.search_dir.join(name)).map_err(|_| {
                    format!("{}: couldn't find include file '{}'", file, name)
                })?,
            };
            self.expanded_includes += 1;
            self.expand(&content, name, depth + 1)?;
        }
        Ok(())
    }
}

/// Name in an `#include "name"` or `#include <name>` line.
fn include_target(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix('#')?.trim_start();
    let rest = rest.strip_prefix("include")?.trim();
    let (open, close) = match rest.chars().next()? {
        '"' => ('"', '"'),
        '<' => ('<', '>'),
        _ => return None,
    };
    let inner = rest.strip_prefix(open)?;
    let end = inner.find(close)?;
    Some(&inner[..end])
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Whole-word search for `ident`.
fn contains_identifier(text: &str, ident: &str) -> bool {
    if ident.is_empty() {
        return false;
    }
    text.match_indices(ident).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + ident.len()..].chars().next();
        !before.is_some_and(is_ident_char) && !after.is_some_and(is_ident_char)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Platform, Stage};
    use tempfile::tempdir;

    fn input(source: &str, entry: &str, env: CompilerEnvironment) -> CompileInput {
        CompileInput {
            source: source.to_string(),
            entry_point: entry.to_string(),
            target: ShaderTarget::new(Platform::PcD3dSm3, Stage::Pixel),
            environment: env,
            game_name: "test".to_string(),
        }
    }

    #[test]
    fn test_include_target() {
        assert_eq!(include_target("#include \"Common.usf\""), Some("Common.usf"));
        assert_eq!(include_target("  # include <Lights.ush>"), Some("Lights.ush"));
        assert_eq!(include_target("#define INCLUDE 1"), None);
        assert_eq!(include_target("float4 Main() {}"), None);
    }

    #[test]
    fn test_contains_identifier() {
        assert!(contains_identifier("void Main() {}", "Main"));
        assert!(!contains_identifier("void MainPixel() {}", "Main"));
        assert!(!contains_identifier("void _Main() {}", "Main"));
        assert!(contains_identifier("Main", "Main"));
        assert!(!contains_identifier("anything", ""));
    }

    #[test]
    fn test_compile_from_blobs() {
        let dir = tempdir().unwrap();
        let env = CompilerEnvironment::default()
            .with_include("Main.usf", "#include \"Common.usf\"\nvoid Main() {\n  Shade();\n}")
            .with_include("Common.usf", "void Shade() {}")
            .with_definition("NUM_LIGHTS", "4");

        let output = PreprocessCompiler
            .compile(&input("Main.usf", "Main", env), &CompileContext::new(0, dir.path()))
            .unwrap();

        assert!(output.succeeded, "errors: {:?}", output.errors);
        let text = String::from_utf8(output.code).unwrap();
        assert!(text.starts_with("#define NUM_LIGHTS 4\n"));
        assert!(text.contains("void Shade() {}"));
        assert_eq!(output.parameters["includes"], "1");
        assert_eq!(output.parameters["entry"], "Main");
        assert_eq!(output.parameters["platform"], "PC-D3D-SM3");
        assert_eq!(output.parameters["stage"], "pixel");
        // void Shade, void Main, Shade(), }
        assert_eq!(output.instruction_count, 4);
    }

    #[test]
    fn test_compile_from_search_dir() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Lights.ush"), "float3 LightColor;").unwrap();
        std::fs::write(
            dir.path().join("Base.usf"),
            "#include <Lights.ush>\nfloat4 MainVS() {}",
        )
        .unwrap();

        let output = PreprocessCompiler
            .compile(
                &input("Base.usf", "MainVS", CompilerEnvironment::default()),
                &CompileContext::new(1, dir.path()),
            )
            .unwrap();
        assert!(output.succeeded);
        assert!(String::from_utf8_lossy(&output.code).contains("LightColor"));
    }

    #[test]
    fn test_missing_source_fails_job() {
        let dir = tempdir().unwrap();
        let output = PreprocessCompiler
            .compile(
                &input("Nope.usf", "Main", CompilerEnvironment::default()),
                &CompileContext::new(0, dir.path()),
            )
            .unwrap();
        assert!(!output.succeeded);
        assert!(output.errors[0].contains("Nope.usf"));
    }

    #[test]
    fn test_missing_include_fails_job() {
        let dir = tempdir().unwrap();
        let env = CompilerEnvironment::default()
            .with_include("Main.usf", "#include \"Missing.ush\"\nvoid Main() {}");
        let output = PreprocessCompiler
            .compile(&input("Main.usf", "Main", env), &CompileContext::new(0, dir.path()))
            .unwrap();
        assert!(!output.succeeded);
        assert!(output.errors[0].contains("Missing.ush"));
    }

    #[test]
    fn test_missing_entry_point_fails_job() {
        let dir = tempdir().unwrap();
        let env = CompilerEnvironment::default().with_include("Main.usf", "void Other() {}");
        let output = PreprocessCompiler
            .compile(&input("Main.usf", "Main", env.clone()), &CompileContext::new(0, dir.path()))
            .unwrap();
        assert!(!output.succeeded);
        assert!(output.errors[0].contains("entry point 'Main'"));

        let skipping = env.with_flag(CompilerFlag::SkipValidation);
        let output = PreprocessCompiler
            .compile(&input("Main.usf", "Main", skipping), &CompileContext::new(0, dir.path()))
            .unwrap();
        assert!(output.succeeded);
    }

    #[test]
    fn test_recursive_include_hits_depth_limit() {
        let dir = tempdir().unwrap();
        let env = CompilerEnvironment::default()
            .with_include("Main.usf", "#include \"Loop.ush\"\nvoid Main() {}")
            .with_include("Loop.ush", "#include \"Loop.ush\"");
        let output = PreprocessCompiler
            .compile(&input("Main.usf", "Main", env), &CompileContext::new(0, dir.path()))
            .unwrap();
        assert!(!output.succeeded);
        assert!(output.errors[0].contains("include depth"));
    }

    #[test]
    fn test_dump_writes_preprocessed_file() {
        let dir = tempdir().unwrap();
        let dump = dir.path().join("dump").join("PC-D3D-SM3");
        let env = CompilerEnvironment::default().with_include("Main.usf", "void Main() {}");
        let ctx = CompileContext::new(0, dir.path()).with_dump_dir(Some(dump.clone()));

        let output = PreprocessCompiler
            .compile(&input("Main.usf", "Main", env), &ctx)
            .unwrap();
        assert!(output.succeeded);
        let dumped = std::fs::read_to_string(dump.join("Main.pre.txt")).unwrap();
        assert!(dumped.contains("void Main() {}"));
    }

    #[test]
    fn test_doubling_include_hits_expansion_limit() {
        let dir = tempdir().unwrap();
        let env = CompilerEnvironment::default()
            .with_include("Main.usf", "#include \"Twice.ush\"\nvoid Main() {}")
            .with_include("Twice.ush", "#include \"Twice.ush\"\n#include \"Twice.ush\"");

        let start = std::time::Instant::now();
        let output = PreprocessCompiler
            .compile(&input("Main.usf", "Main", env), &CompileContext::new(0, dir.path()))
            .unwrap();
        assert!(start.elapsed() < std::time::Duration::from_secs(10));
        assert!(!output.succeeded);
        assert!(output.errors[0].contains("includes expanded"), "{:?}", output.errors);
    }

    #[test]
    fn test_oversized_output_fails_job() {
        let dir = tempdir().unwrap();
        let line = "float4 Pad;\n".repeat(1024);
        let body = "#include \"Big.ush\"\n".repeat(MAX_EXPANDED_BYTES / line.len() + 2);
        let env = CompilerEnvironment::default()
            .with_include("Main.usf", format!("{}void Main() {{}}", body))
            .with_include("Big.ush", line);
        let output = PreprocessCompiler
            .compile(&input("Main.usf", "Main", env), &CompileContext::new(0, dir.path()))
            .unwrap();
        assert!(!output.succeeded);
        assert!(output.errors[0].contains("exceeds"), "{:?}", output.errors);
    }

    #[test]
    fn test_in_process_backend_compiles() {
        let dir = tempdir().unwrap();
        let compiler = PreprocessCompiler::new();
        let mut backend = Backend::InProcess(&compiler);
        let env = CompilerEnvironment::default().with_include("Main.usf", "void Main() {}");
        let output = backend
            .compile(&input("Main.usf", "Main", env), &CompileContext::new(0, dir.path()))
            .unwrap();
        assert!(output.succeeded);
    }
}
