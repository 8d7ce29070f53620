//! Termination analysis for worker processes.
//!
//! Used to explain in a deadlock error why a worker stopped answering.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// Why a worker process stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by a signal sent from outside (SIGTERM, SIGKILL, ...).
    Signaled(Signal),
    /// Died on a fault signal, most likely a crash inside the compiler.
    Crashed(Signal),
    StillAlive,
    Unknown,
}

impl TerminationReason {
    pub fn is_crash(&self) -> bool {
        matches!(self, Self::Crashed(_))
    }

    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Signaled(sig) => format!("killed by signal {:?}", sig),
            Self::Crashed(sig) => format!("crashed ({:?})", sig),
            Self::StillAlive => "still running".to_string(),
            Self::Unknown => "exited for an unknown reason".to_string(),
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.description())
    }
}

pub fn analyze_wait_status(status: WaitStatus) -> TerminationReason {
    match status {
        WaitStatus::Exited(_, code) => TerminationReason::Exited(code),
        WaitStatus::Signaled(_, signal, _) => match signal {
            Signal::SIGSEGV
            | Signal::SIGBUS
            | Signal::SIGILL
            | Signal::SIGABRT
            | Signal::SIGFPE => TerminationReason::Crashed(signal),
            _ => TerminationReason::Signaled(signal),
        },
        WaitStatus::StillAlive => TerminationReason::StillAlive,
        _ => TerminationReason::Unknown,
    }
}
