//! Handle to a launched worker process.

use super::signals::{TerminationReason, analyze_wait_status};
use crate::error::{Error, Result};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::time::{Duration, Instant};

/// A worker process, reaped through `waitpid` so its exit status is kept.
#[derive(Debug)]
pub struct Proc {
    pid: Pid,
    /// Set once the process has been reaped.
    status: Option<WaitStatus>,
}

impl Proc {
    pub fn from_child(child: std::process::Child) -> Self {
        Self {
            pid: Pid::from_raw(child.id() as i32),
            status: None,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Non-blocking liveness check; reaps the process if it has exited.
    pub fn is_running(&mut self) -> bool {
        if self.status.is_some() {
            return false;
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => true,
            Ok(status) => {
                self.status = Some(status);
                false
            }
            Err(_) => {
                // ECHILD: someone else reaped it
                self.status = Some(WaitStatus::StillAlive);
                false
            }
        }
    }

    /// How the process ended, if it has.
    pub fn termination(&mut self) -> TerminationReason {
        if self.is_running() {
            return TerminationReason::StillAlive;
        }
        match self.status {
            Some(WaitStatus::StillAlive) | None => TerminationReason::Unknown,
            Some(status) => analyze_wait_status(status),
        }
    }

    /// Send SIGTERM.
    pub fn terminate(&self) -> Result<()> {
        if self.status.is_some() {
            return Ok(());
        }
        signal::kill(self.pid, Signal::SIGTERM)
            .map_err(|e| Error::WorkerLaunch(format!("Failed to send SIGTERM: {}", e)))
    }

    /// Send SIGKILL and reap.
    pub fn kill(&mut self) -> Result<()> {
        if self.status.is_some() {
            return Ok(());
        }
        signal::kill(self.pid, Signal::SIGKILL)
            .map_err(|e| Error::WorkerLaunch(format!("Failed to send SIGKILL: {}", e)))?;
        match waitpid(self.pid, None) {
            Ok(status) => self.status = Some(status),
            Err(_) => self.status = Some(WaitStatus::StillAlive),
        }
        Ok(())
    }

    /// SIGTERM, wait up to `timeout`, then SIGKILL.
    pub fn stop(&mut self, timeout: Duration) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        let _ = self.terminate();

        let start = Instant::now();
        while start.elapsed() < timeout {
            if !self.is_running() {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        self.kill()
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        let _ = self.stop(Duration::from_millis(100));
    }
}
