//! Binary request/response format exchanged with worker processes.
//!
//! All integers are little-endian. Strings and blobs are a `u32` length
//! followed by the bytes, with no terminator. Tables and lists are a `u32`
//! entry count followed by the entries, so values may hold any text.
//!
//! Request:
//!
//! ```text
//! u8 kind | u8 version=2 | str game | str source | str entry | u8 stage (1 = vertex)
//! u32 flag mask | u32 include count | { str name | str content }*
//! u32 definition count | { str name | str value }* | u8 dump | str dump path
//! ```
//!
//! Response:
//!
//! ```text
//! u8 version=1 | u8 kind | u8 outcome
//!   outcome 0/1:  blob code | u32 parameter count | { str name | str value }*
//!                 u32 error count | { str error }* | u32 instruction count
//!   outcome 0xFF: str error (kind is WorkerError)
//! ```

use crate::backend::CompileInput;
use crate::error::{Error, Result};
use crate::job::{
    CompileOutput, CompilerEnvironment, CompilerFlag, JobKind, ShaderTarget, Stage,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const REQUEST_VERSION: u8 = 2;
pub const RESPONSE_VERSION: u8 = 1;

const OUTCOME_FAILED: u8 = 0;
const OUTCOME_SUCCEEDED: u8 = 1;
const OUTCOME_FATAL: u8 = 0xFF;

/// A job handed to a worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRequest {
    pub kind: JobKind,
    pub input: CompileInput,
    /// Debug dump directory; `None` when dumping is off.
    pub dump_dir: Option<PathBuf>,
}

impl WorkerRequest {
    pub fn new(input: CompileInput, dump_dir: Option<&Path>) -> Self {
        Self {
            kind: input.job_kind(),
            input,
            dump_dir: dump_dir.map(Path::to_path_buf),
        }
    }

    pub fn encode(&self) -> Bytes {
        let input = &self.input;
        let mut buf = BytesMut::with_capacity(256 + input.source.len());

        buf.put_u8(self.kind.tag());
        buf.put_u8(REQUEST_VERSION);
        put_str(&mut buf, &input.game_name);
        put_str(&mut buf, &input.source);
        put_str(&mut buf, &input.entry_point);
        buf.put_u8(u8::from(input.target.stage == Stage::Vertex));
        buf.put_u32_le(CompilerFlag::to_mask(&input.environment.flags));

        put_table(&mut buf, &input.environment.includes);
        put_table(&mut buf, &input.environment.definitions);

        let dump_path = self
            .dump_dir
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        buf.put_u8(u8::from(self.dump_dir.is_some()));
        put_str(&mut buf, &dump_path);

        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);

        let kind_tag = r.u8("job kind")?;
        let version = r.u8("request version")?;
        if version != REQUEST_VERSION {
            return Err(Error::ProtocolVersion {
                expected: REQUEST_VERSION,
                found: version,
            });
        }
        let kind = JobKind::from_tag(kind_tag)
            .ok_or_else(|| Error::Protocol(format!("unknown job kind {}", kind_tag)))?;
        let platform = kind
            .platform()
            .ok_or_else(|| Error::Protocol(format!("{} is not a compile job", kind)))?;

        let game_name = r.string("game name")?;
        let source = r.string("source")?;
        let entry_point = r.string("entry point")?;
        let stage = if r.u8("stage")? != 0 {
            Stage::Vertex
        } else {
            Stage::Pixel
        };
        let flags = CompilerFlag::from_mask(r.u32("flags")?);

        let includes = r.table("include")?;
        let definitions = r.table("definition")?;
        let dump = r.u8("dump flag")? != 0;
        let dump_path = r.string("dump path")?;

        Ok(Self {
            kind,
            input: CompileInput {
                source,
                entry_point,
                target: ShaderTarget::new(platform, stage),
                environment: CompilerEnvironment {
                    includes,
                    definitions,
                    flags,
                },
                game_name,
            },
            dump_dir: (dump && !dump_path.is_empty()).then(|| PathBuf::from(dump_path)),
        })
    }
}

/// What a worker process wrote back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerResponse {
    /// The job ran; `output.succeeded` says whether it compiled.
    Completed { kind: JobKind, output: CompileOutput },
    /// The worker hit an internal error. Always fatal for the run.
    Fatal { message: String },
}

impl WorkerResponse {
    pub fn completed(kind: JobKind, output: CompileOutput) -> Self {
        Self::Completed { kind, output }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(RESPONSE_VERSION);

        match self {
            Self::Completed { kind, output } => {
                buf.put_u8(kind.tag());
                buf.put_u8(if output.succeeded {
                    OUTCOME_SUCCEEDED
                } else {
                    OUTCOME_FAILED
                });
                put_blob(&mut buf, &output.code);
                put_table(&mut buf, &output.parameters);
                put_len(&mut buf, output.errors.len());
                for error in &output.errors {
                    put_str(&mut buf, error);
                }
                buf.put_u32_le(output.instruction_count);
            }
            Self::Fatal { message } => {
                buf.put_u8(JobKind::WorkerError.tag());
                buf.put_u8(OUTCOME_FATAL);
                put_str(&mut buf, message);
            }
        }

        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);

        let version = r.u8("response version")?;
        if version != RESPONSE_VERSION {
            return Err(Error::ProtocolVersion {
                expected: RESPONSE_VERSION,
                found: version,
            });
        }
        let kind_tag = r.u8("job kind")?;
        let kind = JobKind::from_tag(kind_tag)
            .ok_or_else(|| Error::Protocol(format!("unknown job kind {}", kind_tag)))?;

        match r.u8("outcome")? {
            OUTCOME_FATAL => Ok(Self::Fatal {
                message: r.string("error")?,
            }),
            outcome @ (OUTCOME_FAILED | OUTCOME_SUCCEEDED) => {
                let code = r.blob("code")?.to_vec();
                let parameters = r.table("parameter")?;
                let error_count = r.u32("error count")?;
                let errors = (0..error_count)
                    .map(|_| r.string("error"))
                    .collect::<Result<Vec<_>>>()?;
                let instruction_count = r.u32("instruction count")?;

                Ok(Self::Completed {
                    kind,
                    output: CompileOutput {
                        succeeded: outcome == OUTCOME_SUCCEEDED,
                        code,
                        parameters,
                        errors,
                        instruction_count,
                    },
                })
            }
            other => Err(Error::Protocol(format!("unknown outcome {:#04x}", other))),
        }
    }
}

fn put_len(buf: &mut BytesMut, len: usize) {
    // Anything this large would not fit in a request file anyway.
    buf.put_u32_le(u32::try_from(len).unwrap_or(u32::MAX));
}

fn put_blob(buf: &mut BytesMut, data: &[u8]) {
    put_len(buf, data.len());
    buf.put_slice(data);
}

fn put_str(buf: &mut BytesMut, s: &str) {
    put_blob(buf, s.as_bytes());
}

fn put_table(buf: &mut BytesMut, table: &BTreeMap<String, String>) {
    put_len(buf, table.len());
    for (name, value) in table {
        put_str(buf, name);
        put_str(buf, value);
    }
}

/// Bounds-checked cursor. `Buf` panics on short reads, so every read checks
/// `remaining()` first and names the field on failure.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize, field: &str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(Error::Protocol(format!(
                "truncated message reading {} (need {} bytes, have {})",
                field,
                n,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    fn u8(&mut self, field: &str) -> Result<u8> {
        self.need(1, field)?;
        Ok(self.buf.get_u8())
    }

    fn u32(&mut self, field: &str) -> Result<u32> {
        self.need(4, field)?;
        Ok(self.buf.get_u32_le())
    }

    fn blob(&mut self, field: &str) -> Result<&'a [u8]> {
        let len = self.u32(field)? as usize;
        self.need(len, field)?;
        let (data, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(data)
    }

    fn string(&mut self, field: &str) -> Result<String> {
        let data = self.blob(field)?;
        String::from_utf8(data.to_vec())
            .map_err(|_| Error::Protocol(format!("{} is not valid UTF-8", field)))
    }

    /// Counted `name | value` pairs, read as `<entry> count`, `<entry> name`
    /// and `<entry> value`.
    fn table(&mut self, entry: &str) -> Result<BTreeMap<String, String>> {
        let count = self.u32(&format!("{} count", entry))?;
        let mut table = BTreeMap::new();
        for _ in 0..count {
            let name = self.string(&format!("{} name", entry))?;
            let value = self.string(&format!("{} value", entry))?;
            table.insert(name, value);
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Platform;

    fn sample_input() -> CompileInput {
        CompileInput {
            source: "BasePass.usf".to_string(),
            entry_point: "MainVertexShader".to_string(),
            target: ShaderTarget::new(Platform::Ps3, Stage::Vertex),
            environment: CompilerEnvironment::default()
                .with_include("Material.usf", "float4 Tint;")
                .with_definition("NUM_LIGHTS", "4")
                .with_flag(CompilerFlag::Debug),
            game_name: "ExampleGame".to_string(),
        }
    }

    #[test]
    fn test_request_layout() {
        let request = WorkerRequest::new(sample_input(), None);
        let data = request.encode();

        assert_eq!(data[0], JobKind::Ps3.tag());
        assert_eq!(data[1], REQUEST_VERSION);
        // game name length prefix
        assert_eq!(&data[2..6], &11u32.to_le_bytes());
        assert_eq!(&data[6..17], b"ExampleGame");
    }

    #[test]
    fn test_request_decode_preserves_job() {
        let dump = PathBuf::from("/tmp/dump/PS3");
        let request = WorkerRequest::new(sample_input(), Some(&dump));
        let decoded = WorkerRequest::decode(&request.encode()).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(decoded.dump_dir, Some(dump));
    }

    #[test]
    fn test_request_version_mismatch() {
        let mut data = WorkerRequest::new(sample_input(), None).encode().to_vec();
        data[1] = 9;
        match WorkerRequest::decode(&data) {
            Err(Error::ProtocolVersion { expected, found }) => {
                assert_eq!(expected, REQUEST_VERSION);
                assert_eq!(found, 9);
            }
            other => panic!("expected version error, got {:?}", other),
        }
    }

    #[test]
    fn test_request_rejects_worker_error_kind() {
        let mut data = WorkerRequest::new(sample_input(), None).encode().to_vec();
        data[0] = JobKind::WorkerError.tag();
        assert!(matches!(WorkerRequest::decode(&data), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_truncated_request() {
        let data = WorkerRequest::new(sample_input(), None).encode();
        let err = WorkerRequest::decode(&data[..data.len() - 3]).unwrap_err();
        assert!(err.to_string().contains("truncated"));
        assert!(err.to_string().contains("dump path"));
    }

    #[test]
    fn test_response_layout() {
        let output = CompileOutput {
            succeeded: true,
            code: vec![0xAB, 0xCD],
            parameters: BTreeMap::from([("lines".to_string(), "3".to_string())]),
            errors: Vec::new(),
            instruction_count: 7,
        };
        let data = WorkerResponse::completed(JobKind::Xenon, output).encode();

        assert_eq!(&data[..3], &[RESPONSE_VERSION, JobKind::Xenon.tag(), OUTCOME_SUCCEEDED]);
        assert_eq!(&data[3..7], &2u32.to_le_bytes());
        assert_eq!(&data[7..9], &[0xAB, 0xCD]);
        assert_eq!(&data[data.len() - 4..], &7u32.to_le_bytes());
    }

    #[test]
    fn test_failed_response_keeps_all_errors() {
        let output = CompileOutput {
            succeeded: false,
            errors: vec!["line 3: bad".to_string(), "line 9: worse".to_string()],
            ..Default::default()
        };
        let response = WorkerResponse::completed(JobKind::Ps3, output);
        assert_eq!(WorkerResponse::decode(&response.encode()).unwrap(), response);
    }

    #[test]
    fn test_fatal_response() {
        let data = WorkerResponse::fatal("CriticalError: out of disk").encode();
        assert_eq!(&data[..3], &[RESPONSE_VERSION, JobKind::WorkerError.tag(), OUTCOME_FATAL]);
        assert_eq!(
            WorkerResponse::decode(&data).unwrap(),
            WorkerResponse::Fatal {
                message: "CriticalError: out of disk".to_string()
            }
        );
    }

    #[test]
    fn test_response_version_mismatch() {
        let mut data = WorkerResponse::fatal("x").encode().to_vec();
        data[0] = 3;
        assert!(matches!(
            WorkerResponse::decode(&data),
            Err(Error::ProtocolVersion { expected: RESPONSE_VERSION, found: 3 })
        ));
    }

    #[test]
    fn test_unknown_outcome() {
        let data = [RESPONSE_VERSION, JobKind::Ps3.tag(), 7];
        let err = WorkerResponse::decode(&data).unwrap_err();
        assert!(err.to_string().contains("unknown outcome"));
    }

    #[test]
    fn test_multiline_values_keep_their_shape() {
        let mut input = sample_input();
        input.environment = input
            .environment
            .with_definition("MATERIAL_BODY", "float4 a;\nfloat4 b;\r")
            .with_definition("EMPTY", "");
        let request = WorkerRequest::new(input, None);
        let decoded = WorkerRequest::decode(&request.encode()).unwrap();
        let definitions = &decoded.input.environment.definitions;
        assert_eq!(definitions["MATERIAL_BODY"], "float4 a;\nfloat4 b;\r");
        assert_eq!(definitions["EMPTY"], "");

        let output = CompileOutput {
            succeeded: false,
            parameters: BTreeMap::from([("log".to_string(), "a\nb".to_string())]),
            errors: vec!["line 3:\n  unexpected '}'".to_string(), String::new()],
            ..Default::default()
        };
        let response = WorkerResponse::completed(JobKind::Ps3, output);
        match WorkerResponse::decode(&response.encode()).unwrap() {
            WorkerResponse::Completed { output, .. } => {
                assert_eq!(output.errors.len(), 2);
                assert_eq!(output.errors[0], "line 3:\n  unexpected '}'");
                assert_eq!(output.parameters["log"], "a\nb");
            }
            other => panic!("unexpected response {:?}", other),
        }
    }
}
