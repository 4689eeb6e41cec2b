use crate::config::{LaunchConfig, SupervisorConfig};
use crate::error::{DevwardenError, Result};
use crate::process::health::{HealthMonitor, HealthStatus, ReadinessProbe, ReadyOutcome};
use crate::process::launcher::ProcessLauncher;
use crate::process::registry::ProcessRegistry;
use crate::process::supervisor::Supervisor;
use crate::process::types::{ProcessId, ProcessStatus, StatusSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How a start request ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartOutcome {
    /// Launched and the readiness probe matched
    Ready,
    /// Launched without waiting for readiness
    Started,
    /// Launched but not ready within the readiness timeout
    TimedOut,
    /// Launched but failed during startup
    Failed(String),
}

impl From<ReadyOutcome> for StartOutcome {
    fn from(outcome: ReadyOutcome) -> Self {
        match outcome {
            ReadyOutcome::Ready => StartOutcome::Ready,
            ReadyOutcome::TimedOut => StartOutcome::TimedOut,
            ReadyOutcome::Failed(reason) => StartOutcome::Failed(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartReport {
    pub identity: ProcessId,
    pub outcome: StartOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopOutcome {
    Stopped,
    NotFound,
}

/// The operations a remote client may perform on the supervised set
///
/// Owns the whole process stack: one registry, launcher, health monitor and
/// supervisor, all sharing the same configuration.
pub struct ControlSurface {
    registry: Arc<ProcessRegistry>,
    launcher: Arc<ProcessLauncher>,
    monitor: Arc<HealthMonitor>,
    supervisor: Arc<Supervisor>,
    config: SupervisorConfig,
}

impl ControlSurface {
    pub fn new(config: SupervisorConfig) -> Self {
        let registry = Arc::new(ProcessRegistry::new());
        let launcher = Arc::new(ProcessLauncher::new(Arc::clone(&registry), &config));
        let monitor = HealthMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&launcher),
            config.readiness_poll_interval,
            config.grace_period,
        );
        Self::assemble(registry, launcher, monitor, config)
    }

    /// Same as `new`, with a custom readiness probe
    pub fn with_probe(config: SupervisorConfig, probe: Arc<dyn ReadinessProbe>) -> Self {
        let registry = Arc::new(ProcessRegistry::new());
        let launcher = Arc::new(ProcessLauncher::new(Arc::clone(&registry), &config));
        let monitor = HealthMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&launcher),
            config.readiness_poll_interval,
            config.grace_period,
        )
        .with_probe(probe);
        Self::assemble(registry, launcher, monitor, config)
    }

    fn assemble(
        registry: Arc<ProcessRegistry>,
        launcher: Arc<ProcessLauncher>,
        monitor: HealthMonitor,
        config: SupervisorConfig,
    ) -> Self {
        let monitor = Arc::new(monitor);
        let supervisor = Arc::new(Supervisor::new(
            Arc::clone(&registry),
            Arc::clone(&launcher),
            Arc::clone(&monitor),
            config.clone(),
        ));

        Self {
            registry,
            launcher,
            monitor,
            supervisor,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Launch a process, put it under supervision and optionally wait for it
    /// to become ready
    ///
    /// Readiness timeouts and startup failures are reported in the
    /// `StartReport`, not as errors; the record stays listed as `Failed`.
    pub async fn start(&self, config: LaunchConfig, wait_ready: bool) -> Result<StartReport> {
        if self.supervisor.is_shutting_down() {
            return Err(DevwardenError::Launch("supervisor is shutting down".to_string()));
        }

        let record = self.launcher.launch(config).await?;
        let identity = record.identity;
        self.supervisor.watch(identity);

        let outcome = if wait_ready {
            self.monitor
                .wait_until_ready(identity, self.config.readiness_timeout)
                .await?
                .into()
        } else {
            StartOutcome::Started
        };

        Ok(StartReport { identity, outcome })
    }

    /// Stop a process and forget it
    ///
    /// # Returns
    /// * `Ok(StopOutcome::Stopped)` - terminated and removed
    /// * `Ok(StopOutcome::NotFound)` - no such record (or already stopped)
    /// * `Err(DevwardenError::Signal)` - the process could not be signalled
    pub async fn stop(&self, identity: ProcessId) -> Result<StopOutcome> {
        let Some(record) = self.registry.get(identity) else {
            return Ok(StopOutcome::NotFound);
        };

        self.supervisor.unwatch(identity);
        self.registry.mark_stop_requested(identity);

        let outcome = self.launcher.terminate(&record, self.config.grace_period).await?;
        tracing::debug!(pid = %identity, ?outcome, "Terminated on request");

        let _ = self.registry.set_status(identity, ProcessStatus::Stopped);
        match self.registry.remove(identity) {
            Some(_) => {
                tracing::info!(pid = %identity, name = %record.name(), "Process stopped");
                Ok(StopOutcome::Stopped)
            }
            None => Ok(StopOutcome::NotFound),
        }
    }

    pub fn status(&self, identity: ProcessId) -> Option<StatusSnapshot> {
        self.registry.get(identity).map(|record| record.snapshot())
    }

    /// Snapshots of every record, ordered by identity
    pub fn list(&self) -> Vec<StatusSnapshot> {
        let mut snapshots: Vec<_> = self.registry.list().iter().map(|r| r.snapshot()).collect();
        snapshots.sort_by_key(|s| s.identity);
        snapshots
    }

    /// Captured output, optionally only the last `lines` lines
    pub fn logs(&self, identity: ProcessId, lines: Option<usize>) -> Option<String> {
        let record = self.registry.get(identity)?;
        let text = match lines {
            Some(n) => record
                .output
                .tail(n)
                .into_iter()
                .map(|line| line.text + "\n")
                .collect::<String>(),
            None => record.output.text(),
        };
        Some(text)
    }

    pub async fn health(&self, identity: ProcessId) -> Result<HealthStatus> {
        self.monitor.check_health(identity).await
    }

    /// Tear down everything; see `Supervisor::shutdown`
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}
