// PID file for the devwarden daemon

use crate::config::default_pid_file;
use crate::error::{DevwardenError, Result};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs;
use std::path::{Path, PathBuf};

/// The daemon's PID file
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new() -> Self {
        Self::with_path(default_pid_file())
    }

    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Record the current process id
    pub fn write(&self) -> Result<()> {
        fs::write(&self.path, format!("{}\n", std::process::id()))
            .map_err(|e| DevwardenError::Other(format!("Failed to write PID file {}: {}", self.path.display(), e)))
    }

    pub fn read(&self) -> Result<u32> {
        let content = fs::read_to_string(&self.path)
            .map_err(|e| DevwardenError::Other(format!("Failed to read PID file: {}", e)))?;

        content
            .trim()
            .parse::<u32>()
            .map_err(|e| DevwardenError::Other(format!("Invalid PID in file: {}", e)))
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Remove the file; a missing file is fine
    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DevwardenError::Other(format!("Failed to remove PID file: {}", e))),
        }
    }

    /// The recorded pid, if it belongs to a live process
    pub fn running_pid(&self) -> Option<u32> {
        self.read().ok().filter(|&pid| is_process_alive(pid))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for PidFile {
    fn default() -> Self {
        Self::new()
    }
}

/// Probe with signal 0
pub(crate) fn is_process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read_pid() {
        let dir = TempDir::new().unwrap();
        let pid_file = PidFile::with_path(dir.path().join("devwarden.pid"));

        pid_file.write().unwrap();
        assert_eq!(pid_file.read().unwrap(), std::process::id());
        assert_eq!(pid_file.running_pid(), Some(std::process::id()));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let pid_file = PidFile::with_path(dir.path().join("devwarden.pid"));

        pid_file.write().unwrap();
        assert!(pid_file.exists());

        pid_file.remove().unwrap();
        pid_file.remove().unwrap();
        assert!(!pid_file.exists());
        assert!(pid_file.running_pid().is_none());
    }

    #[test]
    fn test_garbage_pid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("devwarden.pid");
        std::fs::write(&path, "not-a-pid").unwrap();

        let pid_file = PidFile::with_path(&path);
        assert!(pid_file.read().is_err());
        assert!(pid_file.running_pid().is_none());
    }

    #[test]
    fn test_dead_pid_is_not_running() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("devwarden.pid");

        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        std::fs::write(&path, pid.to_string()).unwrap();

        assert!(PidFile::with_path(&path).running_pid().is_none());
    }
}
