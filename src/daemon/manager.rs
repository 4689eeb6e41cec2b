// Daemon lifecycle: registration through the PID file, status and stop

use super::pid::{is_process_alive, PidFile};
use crate::error::{DevwardenError, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// How `stop_daemon` ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStopOutcome {
    Graceful,
    ForceKilled,
}

#[derive(Debug, Clone)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub pid_file: PathBuf,
}

pub struct DaemonManager {
    pid_file: PidFile,
}

impl DaemonManager {
    pub fn new() -> Self {
        Self::with_pid_file(PidFile::new())
    }

    pub fn with_pid_file(pid_file: PidFile) -> Self {
        Self { pid_file }
    }

    pub fn is_running(&self) -> bool {
        self.pid_file.running_pid().is_some()
    }

    pub fn get_pid(&self) -> Option<u32> {
        self.pid_file.running_pid()
    }

    /// Claim the PID file for the current process
    ///
    /// A file left behind by a dead daemon is replaced.
    pub fn register_daemon(&self) -> Result<()> {
        if let Some(pid) = self.pid_file.running_pid() {
            if pid != std::process::id() {
                return Err(DevwardenError::DaemonAlreadyRunning);
            }
        }

        self.pid_file.remove()?;
        self.pid_file.write()?;
        tracing::debug!(pid_file = %self.pid_file.path().display(), "Registered daemon");
        Ok(())
    }

    pub fn unregister_daemon(&self) -> Result<()> {
        self.pid_file.remove()
    }

    /// Ask the daemon to shut down with SIGTERM, escalating to SIGKILL
    /// once `timeout` expires
    pub fn stop_daemon(&self, timeout: Duration) -> Result<DaemonStopOutcome> {
        let pid = self.get_pid().ok_or(DevwardenError::DaemonNotRunning)?;
        let target = Pid::from_raw(pid as i32);

        kill(target, Signal::SIGTERM)
            .map_err(|e| DevwardenError::Signal(format!("Failed to send SIGTERM to daemon {}: {}", pid, e)))?;

        if wait_until_gone(pid, timeout) {
            self.pid_file.remove()?;
            return Ok(DaemonStopOutcome::Graceful);
        }

        tracing::warn!(pid, "Daemon did not stop in time, sending SIGKILL");
        kill(target, Signal::SIGKILL)
            .map_err(|e| DevwardenError::Signal(format!("Failed to send SIGKILL to daemon {}: {}", pid, e)))?;

        if wait_until_gone(pid, Duration::from_secs(2)) {
            self.pid_file.remove()?;
            return Ok(DaemonStopOutcome::ForceKilled);
        }

        Err(DevwardenError::Stop(
            pid.to_string(),
            "daemon survived SIGKILL".to_string(),
        ))
    }

    pub fn get_status(&self) -> DaemonStatus {
        let pid = self.get_pid();
        DaemonStatus {
            running: pid.is_some(),
            pid,
            pid_file: self.pid_file.path().to_path_buf(),
        }
    }
}

impl Default for DaemonManager {
    fn default() -> Self {
        Self::new()
    }
}

fn wait_until_gone(pid: u32, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if !is_process_alive(pid) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    !is_process_alive(pid)
}
