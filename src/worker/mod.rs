//! External compile worker processes.
//!
//! Jobs for some platforms are compiled by a long-lived worker process rather
//! than on the scheduler thread itself. Each scheduler thread owns at most one
//! worker, reached through a [`WorkerChannel`].
//!
//! ```text
//!   scheduler thread N                      worker process
//!   ──────────────────                      ──────────────
//!   write WorkerInput.bin   ──────────────▶ read + delete request
//!   poll WorkerOutput.bin                    compile
//!   read + delete response  ◀────────────── write WorkerOutput.bin
//! ```
//!
//! A worker that exits without answering is relaunched a bounded number of
//! times per job; after that the job's thread reports a deadlock.

mod channel;
mod proc;
pub mod protocol;
mod signals;
mod spawn;
pub mod worker_main;

pub use channel::{ChannelSettings, WorkerChannel, clean_stale_working_dirs, process_alive};
pub use protocol::{WorkerRequest, WorkerResponse};
pub use signals::TerminationReason;
pub use spawn::LaunchSpec;
pub use worker_main::{WorkerOptions, run_worker_main};
