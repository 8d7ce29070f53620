//! Compile job data model.
//!
//! A [`CompileJob`] is the unit of work handed to the scheduler. Its result
//! is not stored on the job itself: the scheduler keeps one write-once slot
//! per queue index and pairs it back up with the job in the run report.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Target platform of a shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Platform {
    PcD3dSm2,
    PcD3dSm3,
    PcD3dSm4,
    Xbox360,
    Ps3,
}

impl Platform {
    /// All known platforms.
    pub const ALL: [Platform; 5] = [
        Platform::PcD3dSm2,
        Platform::PcD3dSm3,
        Platform::PcD3dSm4,
        Platform::Xbox360,
        Platform::Ps3,
    ];

    /// Human-readable platform name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PcD3dSm2 => "PC-D3D-SM2",
            Self::PcD3dSm3 => "PC-D3D-SM3",
            Self::PcD3dSm4 => "PC-D3D-SM4",
            Self::Xbox360 => "Xbox360",
            Self::Ps3 => "PS3",
        }
    }

    /// Worker job kind used when this platform is compiled out of process.
    pub fn job_kind(&self) -> JobKind {
        match self {
            Self::PcD3dSm2 | Self::PcD3dSm3 => JobKind::D3d9,
            Self::PcD3dSm4 => JobKind::D3d10,
            Self::Xbox360 => JobKind::Xenon,
            Self::Ps3 => JobKind::Ps3,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| {
                p.as_str().eq_ignore_ascii_case(s) || format!("{:?}", p).eq_ignore_ascii_case(s)
            })
            .ok_or_else(|| {
                format!(
                    "Unknown platform: '{}'. Valid options: PC-D3D-SM2, PC-D3D-SM3, PC-D3D-SM4, Xbox360, PS3",
                    s
                )
            })
    }
}

/// Pipeline stage a shader is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Vertex,
    Pixel,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Pixel => "pixel",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Platform plus stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShaderTarget {
    pub platform: Platform,
    pub stage: Stage,
}

impl ShaderTarget {
    pub fn new(platform: Platform, stage: Stage) -> Self {
        Self { platform, stage }
    }
}

/// Job-type tag carried in worker requests and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum JobKind {
    D3d9 = 0,
    D3d10 = 1,
    Xenon = 2,
    Ps3 = 3,
    /// Only ever appears in responses, marks a fatal worker error.
    WorkerError = 4,
}

impl JobKind {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::D3d9),
            1 => Some(Self::D3d10),
            2 => Some(Self::Xenon),
            3 => Some(Self::Ps3),
            4 => Some(Self::WorkerError),
            _ => None,
        }
    }

    /// Console compilers expect every shared shader file next to the main
    /// source, so their working directory is seeded with the fixtures.
    pub fn needs_shared_fixtures(self) -> bool {
        matches!(self, Self::Xenon | Self::Ps3)
    }

    /// Platform a worker assumes for requests of this kind.
    ///
    /// The request only carries the kind tag, so both Shader Model 2 and 3
    /// come back as Shader Model 3.
    pub fn platform(self) -> Option<Platform> {
        match self {
            Self::D3d9 => Some(Platform::PcD3dSm3),
            Self::D3d10 => Some(Platform::PcD3dSm4),
            Self::Xenon => Some(Platform::Xbox360),
            Self::Ps3 => Some(Platform::Ps3),
            Self::WorkerError => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::D3d9 => "D3D9Shader",
            Self::D3d10 => "D3D10Shader",
            Self::Xenon => "XenonShader",
            Self::Ps3 => "PS3Shader",
            Self::WorkerError => "WorkerError",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compiler flags, encoded on the wire as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompilerFlag {
    PreferFlowControl,
    Debug,
    AvoidFlowControl,
    SkipValidation,
}

impl CompilerFlag {
    const ALL: [CompilerFlag; 4] = [
        CompilerFlag::PreferFlowControl,
        CompilerFlag::Debug,
        CompilerFlag::AvoidFlowControl,
        CompilerFlag::SkipValidation,
    ];

    fn bit(self) -> u32 {
        1 << (self as u32)
    }

    /// Pack a flag list into a bitmask.
    pub fn to_mask(flags: &[CompilerFlag]) -> u32 {
        flags.iter().fold(0, |mask, flag| mask | flag.bit())
    }

    /// Unpack a bitmask; unknown bits are ignored.
    pub fn from_mask(mask: u32) -> Vec<CompilerFlag> {
        Self::ALL.into_iter().filter(|f| mask & f.bit() != 0).collect()
    }
}

/// The environment used to compile a shader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerEnvironment {
    /// Include blobs, keyed by the name used in `#include`.
    #[serde(default)]
    pub includes: BTreeMap<String, String>,
    /// Preprocessor definitions.
    #[serde(default)]
    pub definitions: BTreeMap<String, String>,
    #[serde(default)]
    pub flags: Vec<CompilerFlag>,
}

impl CompilerEnvironment {
    pub fn with_include(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.includes.insert(name.into(), content.into());
        self
    }

    pub fn with_definition(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.definitions.insert(name.into(), value.into());
        self
    }

    pub fn with_flag(mut self, flag: CompilerFlag) -> Self {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
        self
    }
}

/// One unit of compile work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileJob {
    /// Source file name or path.
    pub source: String,
    pub entry_point: String,
    pub target: ShaderTarget,
    #[serde(default)]
    pub environment: CompilerEnvironment,
}

impl CompileJob {
    pub fn new(
        source: impl Into<String>,
        entry_point: impl Into<String>,
        target: ShaderTarget,
        environment: CompilerEnvironment,
    ) -> Self {
        Self {
            source: source.into(),
            entry_point: entry_point.into(),
            target,
            environment,
        }
    }

    /// Short label used in logs and diagnostics.
    pub fn label(&self) -> String {
        format!("{}:{} ({})", self.source, self.entry_point, self.target.platform)
    }
}

/// Output of one compile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileOutput {
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub code: Vec<u8>,
    /// Diagnostic parameter table reported by the compiler.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub instruction_count: u32,
}

impl CompileOutput {
    pub fn success(code: Vec<u8>) -> Self {
        Self {
            succeeded: true,
            code,
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            errors: vec![error.into()],
            ..Default::default()
        }
    }
}
