//! Error types for shaderfarm.
//!
//! A job whose compile fails is *not* an error: it is recorded in the job's
//! [`CompileOutput`](crate::job::CompileOutput) and stops further dispatch.
//! Everything in [`Error`] is infrastructure failure and aborts the whole run.

use thiserror::Error;

/// Main error type for shaderfarm.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Shader compiling thread {thread_id} failed: {message}")]
    WorkerThread { thread_id: usize, message: String },

    #[error("Shader compiling thread {thread_id} panicked: {message}")]
    ThreadPanicked { thread_id: usize, message: String },

    #[error("Compile worker for thread {thread_id} deadlocked on {job}: {reason}")]
    WorkerDeadlock {
        thread_id: usize,
        job: String,
        reason: String,
    },

    #[error("Compile worker for thread {thread_id} terminated with message: {message}")]
    WorkerReported { thread_id: usize, message: String },

    #[error("Failed to launch compile worker: {0}")]
    WorkerLaunch(String),

    #[error("Worker protocol version mismatch: expected {expected}, found {found}")]
    ProtocolVersion { expected: u8, found: u8 },

    #[error("Worker protocol error: {0}")]
    Protocol(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid batch manifest: {0}")]
    Manifest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Thread id this error is attributed to, if any.
    pub fn thread_id(&self) -> Option<usize> {
        match self {
            Self::WorkerThread { thread_id, .. }
            | Self::ThreadPanicked { thread_id, .. }
            | Self::WorkerDeadlock { thread_id, .. }
            | Self::WorkerReported { thread_id, .. } => Some(*thread_id),
            _ => None,
        }
    }
}

/// Result type alias for shaderfarm operations.
pub type Result<T> = std::result::Result<T, Error>;
