use crate::config::LaunchConfig;
use crate::process::output::OutputBuffer;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;

/// Identity of a supervised process: the OS pid assigned at spawn time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(pub u32);

impl ProcessId {
    pub fn new(pid: u32) -> Self {
        Self(pid)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a supervised process
///
/// ```text
/// Starting  -> Running | Failed | Stopped
/// Running   -> Unhealthy | Stopped | Failed
/// Unhealthy -> Stopped | Failed
/// ```
///
/// `Stopped` and `Failed` are terminal. A restart never re-enters
/// `Starting` on the same record; it registers a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessStatus {
    Starting,
    Running,
    Unhealthy,
    Stopped,
    Failed,
}

impl ProcessStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessStatus::Stopped | ProcessStatus::Failed)
    }

    /// Whether `next` is reachable from `self` in one step
    pub fn can_transition_to(&self, next: ProcessStatus) -> bool {
        use ProcessStatus::*;

        match (self, next) {
            (Stopped | Failed, _) => false,
            (_, Stopped) => true,
            (Starting, Running | Failed) => true,
            (Running, Unhealthy | Failed) => true,
            (Unhealthy, Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessStatus::Starting => write!(f, "starting"),
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Unhealthy => write!(f, "unhealthy"),
            ProcessStatus::Stopped => write!(f, "stopped"),
            ProcessStatus::Failed => write!(f, "failed"),
        }
    }
}

/// How a supervised process exited, as reported by the reaper task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub exited_at: SystemTime,
}

impl ExitInfo {
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
            exited_at: SystemTime::now(),
        }
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// Receiving side of the exit notification published by the reaper task
pub type ExitWatch = watch::Receiver<Option<ExitInfo>>;

/// One supervised OS process
///
/// The registry owns the authoritative copy; everything handed out by it is
/// a snapshot. The output buffer and exit watch are shared handles, so a
/// snapshot still observes new output and the eventual exit.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    pub identity: ProcessId,
    pub launch_config: LaunchConfig,
    pub status: ProcessStatus,
    pub start_time: SystemTime,
    pub output: OutputBuffer,
    pub restarts: usize,
    pub stop_requested: bool,
    pub exit: ExitWatch,
}

impl ProcessRecord {
    pub fn new(
        identity: ProcessId,
        launch_config: LaunchConfig,
        output: OutputBuffer,
        exit: ExitWatch,
    ) -> Self {
        Self {
            identity,
            launch_config,
            status: ProcessStatus::Starting,
            start_time: SystemTime::now(),
            output,
            restarts: 0,
            stop_requested: false,
            exit,
        }
    }

    pub fn name(&self) -> &str {
        self.launch_config.display_name()
    }

    /// Exit reported by the reaper, if the process has exited
    pub fn exit_info(&self) -> Option<ExitInfo> {
        self.exit.borrow().clone()
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    pub fn uptime(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.start_time)
            .unwrap_or(Duration::from_secs(0))
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            identity: self.identity,
            name: self.name().to_string(),
            status: self.status,
            launch_config: self.launch_config.clone(),
            start_time: self.start_time,
            uptime: self.uptime(),
            restarts: self.restarts,
            exit: self.exit_info(),
        }
    }
}

/// Serializable point-in-time view of a record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub identity: ProcessId,
    pub name: String,
    pub status: ProcessStatus,
    pub launch_config: LaunchConfig,
    pub start_time: SystemTime,
    pub uptime: Duration,
    pub restarts: usize,
    pub exit: Option<ExitInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProcessStatus::*;

    #[test]
    fn test_allowed_transitions() {
        assert!(Starting.can_transition_to(Running));
        assert!(Starting.can_transition_to(Failed));
        assert!(Starting.can_transition_to(Stopped));
        assert!(Running.can_transition_to(Unhealthy));
        assert!(Running.can_transition_to(Stopped));
        assert!(Running.can_transition_to(Failed));
        assert!(Unhealthy.can_transition_to(Stopped));
        assert!(Unhealthy.can_transition_to(Failed));
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!Running.can_transition_to(Starting));
        assert!(!Starting.can_transition_to(Unhealthy));
        assert!(!Unhealthy.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Starting));
        assert!(!Failed.can_transition_to(Stopped));
        assert!(!Stopped.can_transition_to(Running));
    }

    #[test]
    fn test_terminal_states() {
        assert!(Stopped.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Starting.is_terminal());
        assert!(!Running.is_terminal());
        assert!(!Unhealthy.is_terminal());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Starting.to_string(), "starting");
        assert_eq!(Unhealthy.to_string(), "unhealthy");
        assert_eq!(Failed.to_string(), "failed");
    }

    #[test]
    fn test_record_snapshot() {
        let (_tx, rx) = watch::channel(None);
        let mut config = LaunchConfig::new("main:app");
        config.name = Some("managed".to_string());

        let record = ProcessRecord::new(ProcessId::new(42), config.clone(), OutputBuffer::new(10), rx);
        let snapshot = record.snapshot();

        assert_eq!(snapshot.identity, ProcessId::new(42));
        assert_eq!(snapshot.name, "managed");
        assert_eq!(snapshot.status, Starting);
        assert_eq!(snapshot.launch_config, config);
        assert!(snapshot.exit.is_none());
        assert!(!record.has_exited());
    }

    #[test]
    fn test_exit_info_display() {
        let info = ExitInfo {
            code: Some(1),
            signal: None,
            exited_at: SystemTime::now(),
        };
        assert_eq!(info.to_string(), "exit code 1");

        let info = ExitInfo {
            code: None,
            signal: Some(9),
            exited_at: SystemTime::now(),
        };
        assert_eq!(info.to_string(), "signal 9");
    }
}
