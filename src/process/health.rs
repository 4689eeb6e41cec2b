use crate::error::{DevwardenError, Result};
use crate::process::launcher::ProcessLauncher;
use crate::process::registry::ProcessRegistry;
use crate::process::types::{ProcessId, ProcessRecord, ProcessStatus};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus as SysProcessStatus, ProcessesToUpdate, System};
use tokio::time::Instant;

/// What a readiness probe concluded from a process's output so far
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Failed(String),
    Unknown,
}

/// Decides readiness from the cumulative captured output
pub trait ReadinessProbe: Send + Sync {
    fn evaluate(&self, output: &str) -> Readiness;
}

impl<F> ReadinessProbe for F
where
    F: Fn(&str) -> Readiness + Send + Sync,
{
    fn evaluate(&self, output: &str) -> Readiness {
        self(output)
    }
}

/// Substring-marker probe for uvicorn-style servers
///
/// Ready markers are checked first, so output containing both a ready and
/// a failure marker counts as ready.
#[derive(Debug, Clone)]
pub struct MarkerProbe {
    ready_markers: Vec<String>,
    failure_markers: Vec<String>,
}

impl MarkerProbe {
    pub fn new<R, F>(ready_markers: R, failure_markers: F) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        Self {
            ready_markers: ready_markers.into_iter().map(Into::into).collect(),
            failure_markers: failure_markers.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for MarkerProbe {
    fn default() -> Self {
        Self::new(["Application startup complete"], ["Error", "Exception"])
    }
}

impl ReadinessProbe for MarkerProbe {
    fn evaluate(&self, output: &str) -> Readiness {
        if self.ready_markers.iter().any(|m| output.contains(m.as_str())) {
            return Readiness::Ready;
        }

        match self.failure_markers.iter().find(|m| output.contains(m.as_str())) {
            Some(marker) => Readiness::Failed(format!("output contains failure marker '{}'", marker)),
            None => Readiness::Unknown,
        }
    }
}

/// Result of waiting for a process to become ready
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadyOutcome {
    Ready,
    TimedOut,
    Failed(String),
}

/// Result of a liveness check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    NotFound,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::NotFound => write!(f, "not found"),
        }
    }
}

/// Readiness waits and liveness checks for registered processes
pub struct HealthMonitor {
    registry: Arc<ProcessRegistry>,
    launcher: Arc<ProcessLauncher>,
    probe: Arc<dyn ReadinessProbe>,
    system: Mutex<System>,
    poll_interval: Duration,
    grace_period: Duration,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<ProcessRegistry>,
        launcher: Arc<ProcessLauncher>,
        poll_interval: Duration,
        grace_period: Duration,
    ) -> Self {
        Self {
            registry,
            launcher,
            probe: Arc::new(MarkerProbe::default()),
            system: Mutex::new(System::new()),
            poll_interval,
            grace_period,
        }
    }

    /// Replace the default marker probe
    pub fn with_probe(mut self, probe: Arc<dyn ReadinessProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Whether the process behind `record` is still running
    ///
    /// A process counts as dead once the reaper has seen it exit, when the
    /// OS no longer knows the pid, or when it is a zombie.
    pub fn is_alive(&self, record: &ProcessRecord) -> bool {
        if record.has_exited() {
            return false;
        }

        let pid = Pid::from_u32(record.identity.as_u32());
        let mut system = self.system.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), true, ProcessRefreshKind::new());

        match system.process(pid) {
            Some(process) => !matches!(process.status(), SysProcessStatus::Zombie | SysProcessStatus::Dead),
            None => false,
        }
    }

    /// Poll a `Starting` process until its output shows it is ready
    ///
    /// # Returns
    /// * `Ok(ReadyOutcome::Ready)` - probe matched; status is now `Running`
    /// * `Ok(ReadyOutcome::Failed(_))` - failure marker or process died;
    ///   status is now `Failed`
    /// * `Ok(ReadyOutcome::TimedOut)` - no verdict in time; status is now `Failed`
    /// * `Err(DevwardenError::ProcessNotFound)` - unknown identity
    pub async fn wait_until_ready(&self, identity: ProcessId, timeout: Duration) -> Result<ReadyOutcome> {
        if !self.registry.contains(identity) {
            return Err(DevwardenError::ProcessNotFound(identity.to_string()));
        }

        let deadline = Instant::now() + timeout;

        loop {
            let Some(record) = self.registry.get(identity) else {
                return Ok(ReadyOutcome::Failed("process was removed while starting".to_string()));
            };

            if record.status.is_terminal() {
                return Ok(ReadyOutcome::Failed(format!("process is {}", record.status)));
            }

            if !self.is_alive(&record) {
                let reason = match record.exit_info() {
                    Some(exit) => format!("process exited during startup ({})", exit),
                    None => "process exited during startup".to_string(),
                };
                return Ok(self.fail(identity, reason));
            }

            match self.probe.evaluate(&record.output.text()) {
                Readiness::Ready => {
                    return match self.registry.set_status(identity, ProcessStatus::Running) {
                        Ok(_) => {
                            tracing::info!(pid = %identity, name = %record.name(), "Process is ready");
                            Ok(ReadyOutcome::Ready)
                        }
                        Err(e) => Ok(ReadyOutcome::Failed(e.to_string())),
                    };
                }
                Readiness::Failed(reason) => return Ok(self.fail(identity, reason)),
                Readiness::Unknown => {}
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(pid = %identity, ?timeout, "Process did not become ready in time");
                let _ = self.registry.set_status(identity, ProcessStatus::Failed);
                return Ok(ReadyOutcome::TimedOut);
            }

            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    fn fail(&self, identity: ProcessId, reason: String) -> ReadyOutcome {
        tracing::warn!(pid = %identity, "Process failed to start: {}", reason);
        if let Err(e) = self.registry.set_status(identity, ProcessStatus::Failed) {
            tracing::debug!(pid = %identity, "Could not mark process failed: {}", e);
        }
        ReadyOutcome::Failed(reason)
    }

    /// Liveness check; a dead process is evicted from the registry
    pub async fn check_health(&self, identity: ProcessId) -> Result<HealthStatus> {
        let Some(record) = self.registry.get(identity) else {
            return Ok(HealthStatus::NotFound);
        };

        if self.is_alive(&record) {
            return Ok(HealthStatus::Healthy);
        }

        tracing::warn!(pid = %identity, name = %record.name(), "Process is unhealthy, evicting");

        if record.status == ProcessStatus::Running {
            let _ = self.registry.set_status(identity, ProcessStatus::Unhealthy);
        }
        self.registry.mark_stop_requested(identity);

        if let Err(e) = self.launcher.terminate(&record, self.grace_period).await {
            tracing::error!(pid = %identity, "Failed to terminate unhealthy process: {}", e);
        }

        let _ = self.registry.set_status(identity, ProcessStatus::Stopped);
        self.registry.remove(identity);

        Ok(HealthStatus::Unhealthy)
    }
}
