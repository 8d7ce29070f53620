//! Batch manifests: a JSON list of compile jobs for the `compile` command.

use crate::error::{Error, Result};
use crate::job::{CompileJob, CompilerEnvironment, CompilerFlag, Platform, ShaderTarget, Stage};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A named batch of jobs as written on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub name: Option<String>,
    pub jobs: Vec<ManifestJob>,
    /// Directory the manifest was loaded from.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestJob {
    pub source: String,
    pub entry_point: String,
    pub platform: Platform,
    pub stage: Stage,
    #[serde(default)]
    pub definitions: BTreeMap<String, String>,
    /// Inline include blobs.
    #[serde(default)]
    pub includes: BTreeMap<String, String>,
    /// Include name to file path, relative to the manifest.
    #[serde(default)]
    pub include_files: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub flags: Vec<CompilerFlag>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Manifest(format!("{}: {}", path.display(), e)))?;
        let mut manifest = Self::parse(&contents).map_err(|e| match e {
            Error::Manifest(msg) => Error::Manifest(format!("{}: {}", path.display(), msg)),
            other => other,
        })?;
        manifest.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(manifest)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let manifest: Self =
            serde_json::from_str(contents).map_err(|e| Error::Manifest(e.to_string()))?;
        for (index, job) in manifest.jobs.iter().enumerate() {
            if job.source.trim().is_empty() {
                return Err(Error::Manifest(format!("job {} has an empty source", index)));
            }
            if job.entry_point.trim().is_empty() {
                return Err(Error::Manifest(format!(
                    "job {} has an empty entry_point",
                    index
                )));
            }
        }
        Ok(manifest)
    }

    /// Display name, falling back to "unnamed".
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }

    /// Resolve every job, reading `include_files` into include blobs.
    pub fn into_jobs(self) -> Result<Vec<CompileJob>> {
        let base_dir = self.base_dir;
        self.jobs
            .into_iter()
            .map(|job| job.into_compile_job(&base_dir))
            .collect()
    }
}

impl ManifestJob {
    fn into_compile_job(self, base_dir: &Path) -> Result<CompileJob> {
        let mut includes = self.includes;
        for (name, relative) in self.include_files {
            let path = base_dir.join(&relative);
            let content = std::fs::read_to_string(&path).map_err(|e| {
                Error::Manifest(format!("include '{}' ({}): {}", name, path.display(), e))
            })?;
            includes.insert(name, content);
        }

        let environment = CompilerEnvironment {
            includes,
            definitions: self.definitions,
            flags: self.flags,
        };
        Ok(CompileJob::new(
            self.source,
            self.entry_point,
            ShaderTarget::new(self.platform, self.stage),
            environment,
        ))
    }
}
