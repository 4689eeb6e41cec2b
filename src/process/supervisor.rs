use crate::config::SupervisorConfig;
use crate::error::Result;
use crate::process::health::{HealthMonitor, ReadyOutcome};
use crate::process::launcher::ProcessLauncher;
use crate::process::registry::ProcessRegistry;
use crate::process::restart::{RestartPolicy, RestartTracker};
use crate::process::types::{ProcessId, ProcessRecord, ProcessStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Watches supervised processes and restarts the ones that die unexpectedly
///
/// A single instance owns the watch set; each watched identity carries the
/// restart history of its lineage, which moves to the new identity on every
/// restart.
pub struct Supervisor {
    registry: Arc<ProcessRegistry>,
    launcher: Arc<ProcessLauncher>,
    monitor: Arc<HealthMonitor>,
    config: SupervisorConfig,
    watched: Mutex<HashMap<ProcessId, RestartTracker>>,
    shutdown_tx: watch::Sender<bool>,
    /// Held by a check cycle and by shutdown, so they never interleave
    cycle_lock: tokio::sync::Mutex<()>,
}

impl Supervisor {
    pub fn new(
        registry: Arc<ProcessRegistry>,
        launcher: Arc<ProcessLauncher>,
        monitor: Arc<HealthMonitor>,
        config: SupervisorConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            registry,
            launcher,
            monitor,
            config,
            watched: Mutex::new(HashMap::new()),
            shutdown_tx,
            cycle_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn watched_lock(&self) -> MutexGuard<'_, HashMap<ProcessId, RestartTracker>> {
        self.watched.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn watch(&self, identity: ProcessId) {
        self.watched_lock().entry(identity).or_default();
        debug!(pid = %identity, "Watching process");
    }

    pub fn unwatch(&self, identity: ProcessId) {
        if self.watched_lock().remove(&identity).is_some() {
            debug!(pid = %identity, "Stopped watching process");
        }
    }

    pub fn is_watching(&self, identity: ProcessId) -> bool {
        self.watched_lock().contains_key(&identity)
    }

    pub fn watched(&self) -> Vec<ProcessId> {
        self.watched_lock().keys().copied().collect()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Run check cycles every `poll_interval` until shutdown begins
    pub async fn run(self: Arc<Self>) {
        info!(interval = ?self.config.poll_interval, "Starting process supervisor");

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if *shutdown_rx.borrow_and_update() {
                break;
            }

            tokio::select! {
                _ = interval.tick() => self.check_cycle().await,
                _ = shutdown_rx.changed() => {}
            }
        }

        info!("Process supervisor stopped");
    }

    /// Inspect every watched process once
    pub async fn check_cycle(&self) {
        let _cycle = self.cycle_lock.lock().await;
        if self.is_shutting_down() {
            return;
        }

        for identity in self.watched() {
            if let Err(e) = self.check_one(identity).await {
                error!(pid = %identity, "Supervisor check failed: {}", e);
            }
        }
    }

    async fn check_one(&self, identity: ProcessId) -> Result<()> {
        let Some(record) = self.registry.get(identity) else {
            self.unwatch(identity);
            return Ok(());
        };

        if self.monitor.is_alive(&record) {
            return Ok(());
        }

        if record.stop_requested {
            self.unwatch(identity);
            return Ok(());
        }

        if record.status != ProcessStatus::Failed {
            let exit = record
                .exit_info()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no longer running".to_string());
            warn!(pid = %identity, name = %record.name(), "Process exited unexpectedly ({})", exit);
            if let Err(e) = self.registry.set_status(identity, ProcessStatus::Failed) {
                debug!(pid = %identity, "Could not mark process failed: {}", e);
            }
        }

        if !record.launch_config.auto_restart {
            info!(pid = %identity, "Automatic restart disabled, leaving process failed");
            self.unwatch(identity);
            return Ok(());
        }

        let policy = RestartPolicy::from_launch_config(&record.launch_config);
        let (allowed, due) = {
            let mut watched = self.watched_lock();
            let Some(tracker) = watched.get_mut(&identity) else {
                return Ok(());
            };
            tracker.prune_old_restarts(policy.window);
            (policy.should_restart(tracker), policy.is_due(tracker, Instant::now()))
        };

        if !allowed {
            warn!(
                pid = %identity,
                name = %record.name(),
                max_restarts = policy.max_restarts,
                "Restart limit exceeded, giving up"
            );
            self.unwatch(identity);
            return Ok(());
        }

        if !due {
            debug!(pid = %identity, "Waiting for restart backoff");
            return Ok(());
        }

        self.restart(record).await
    }

    async fn restart(&self, record: ProcessRecord) -> Result<()> {
        let identity = record.identity;
        info!(pid = %identity, name = %record.name(), "Restarting process");

        let new_record = match self
            .launcher
            .relaunch(record.launch_config.clone(), record.restarts + 1)
            .await
        {
            Ok(new_record) => new_record,
            Err(e) => {
                if let Some(tracker) = self.watched_lock().get_mut(&identity) {
                    tracker.record_restart();
                }
                return Err(e);
            }
        };
        let new_identity = new_record.identity;

        let handed_over = {
            let mut watched = self.watched_lock();
            match watched.remove(&identity) {
                Some(mut tracker) => {
                    tracker.record_restart();
                    watched.insert(new_identity, tracker);
                    true
                }
                None => false,
            }
        };

        if !handed_over {
            // Stopped while the replacement was launching
            self.registry.mark_stop_requested(new_identity);
            let _ = self.launcher.terminate(&new_record, self.config.grace_period).await;
            self.registry.remove(new_identity);
            return Ok(());
        }

        self.registry.remove(identity);
        info!(
            old_pid = %identity,
            pid = %new_identity,
            restarts = new_record.restarts,
            "Process restarted"
        );

        let monitor = Arc::clone(&self.monitor);
        let timeout = self.config.readiness_timeout;
        tokio::spawn(async move {
            match monitor.wait_until_ready(new_identity, timeout).await {
                Ok(ReadyOutcome::Ready) => {}
                Ok(outcome) => warn!(pid = %new_identity, ?outcome, "Restarted process did not become ready"),
                Err(e) => debug!(pid = %new_identity, "Readiness wait aborted: {}", e),
            }
        });

        Ok(())
    }

    /// Stop supervising and terminate everything in the registry
    ///
    /// Safe to call more than once and from several tasks; later calls find
    /// nothing left. Teardown runs on its own task, so it completes even if
    /// the caller is cancelled.
    pub async fn shutdown(self: &Arc<Self>) {
        self.shutdown_tx.send_replace(true);

        let this = Arc::clone(self);
        let teardown = tokio::spawn(async move { this.teardown().await });
        if let Err(e) = teardown.await {
            error!("Shutdown task failed: {}", e);
        }
    }

    async fn teardown(&self) {
        let _cycle = self.cycle_lock.lock().await;

        self.watched_lock().clear();

        // A launch racing with us either lands in this listing or is refused
        // and killed by the launcher
        self.registry.close();
        let records = self.registry.list();
        if records.is_empty() {
            debug!("Nothing left to shut down");
            return;
        }

        info!(count = records.len(), "Shutting down supervised processes");

        let mut tasks = JoinSet::new();
        for record in records {
            self.registry.mark_stop_requested(record.identity);
            let launcher = Arc::clone(&self.launcher);
            let grace = self.config.grace_period;
            tasks.spawn(async move {
                let outcome = launcher.terminate(&record, grace).await;
                (record.identity, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((identity, Ok(outcome))) => {
                    debug!(pid = %identity, ?outcome, "Process terminated");
                    let _ = self.registry.set_status(identity, ProcessStatus::Stopped);
                    self.registry.remove(identity);
                }
                Ok((identity, Err(e))) => {
                    error!(pid = %identity, "Failed to terminate process: {}", e);
                    self.registry.remove(identity);
                }
                Err(e) => error!("Termination task failed: {}", e),
            }
        }

        for record in self.registry.clear() {
            warn!(pid = %record.identity, "Record left over after shutdown, terminating");
            if let Err(e) = self.launcher.terminate(&record, self.config.grace_period).await {
                error!(pid = %record.identity, "Failed to terminate process: {}", e);
            }
        }

        info!("Shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LaunchConfig;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config() -> SupervisorConfig {
        SupervisorConfig {
            poll_interval: Duration::from_millis(50),
            readiness_poll_interval: Duration::from_millis(20),
            readiness_timeout: Duration::from_secs(5),
            grace_period: Duration::from_millis(500),
            ..SupervisorConfig::default()
        }
    }

    fn create_supervisor() -> Arc<Supervisor> {
        let config = test_config();
        let registry = Arc::new(ProcessRegistry::new());
        let launcher = Arc::new(ProcessLauncher::new(Arc::clone(&registry), &config));
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&launcher),
            config.readiness_poll_interval,
            config.grace_period,
        ));
        Arc::new(Supervisor::new(registry, launcher, monitor, config))
    }

    fn shell_config(script: &str, dir: &TempDir) -> LaunchConfig {
        let mut config = LaunchConfig::new("test:app");
        config.command = vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()];
        config.port = 0;
        config.working_dir = dir.path().to_path_buf();
        config.restart_delay_ms = 50;
        config
    }

    #[test]
    fn test_watch_set() {
        let supervisor = create_supervisor();
        let id = ProcessId::new(1234);

        assert!(!supervisor.is_watching(id));
        supervisor.watch(id);
        supervisor.watch(id);
        assert!(supervisor.is_watching(id));
        assert_eq!(supervisor.watched(), vec![id]);

        supervisor.unwatch(id);
        supervisor.unwatch(id);
        assert!(supervisor.watched().is_empty());
    }

    #[tokio::test]
    async fn test_missing_record_is_unwatched() {
        let supervisor = create_supervisor();
        let id = ProcessId::new(99999);
        supervisor.watch(id);

        supervisor.check_cycle().await;
        assert!(!supervisor.is_watching(id));
    }

    #[tokio::test]
    async fn test_live_process_left_alone() {
        let dir = TempDir::new().unwrap();
        let supervisor = create_supervisor();

        let record = supervisor.launcher.launch(shell_config("sleep 30", &dir)).await.unwrap();
        supervisor.watch(record.identity);

        supervisor.check_cycle().await;
        assert!(supervisor.is_watching(record.identity));
        assert!(supervisor.registry.contains(record.identity));

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_requested_stop_is_not_restarted() {
        let dir = TempDir::new().unwrap();
        let supervisor = create_supervisor();

        let record = supervisor.launcher.launch(shell_config("exit 0", &dir)).await.unwrap();
        supervisor.watch(record.identity);
        supervisor.registry.mark_stop_requested(record.identity);
        crate::process::launcher::wait_for_exit(&record.exit, Duration::from_secs(5)).await;

        supervisor.check_cycle().await;
        assert!(!supervisor.is_watching(record.identity));
        assert_eq!(supervisor.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_crash_without_restart_marks_failed() {
        let dir = TempDir::new().unwrap();
        let supervisor = create_supervisor();

        let mut config = shell_config("exit 1", &dir);
        config.auto_restart = false;
        let record = supervisor.launcher.launch(config).await.unwrap();
        supervisor.watch(record.identity);
        crate::process::launcher::wait_for_exit(&record.exit, Duration::from_secs(5)).await;

        supervisor.check_cycle().await;

        let stored = supervisor.registry.get(record.identity).unwrap();
        assert_eq!(stored.status, ProcessStatus::Failed);
        assert!(!supervisor.is_watching(record.identity));
    }

    #[tokio::test]
    async fn test_crash_is_restarted_under_new_identity() {
        let dir = TempDir::new().unwrap();
        let supervisor = create_supervisor();

        let marker = dir.path().join("crashed-once");
        let script = format!(
            "if [ -f {m} ]; then echo 'Application startup complete'; sleep 30; else touch {m}; exit 1; fi",
            m = marker.display()
        );
        let record = supervisor.launcher.launch(shell_config(&script, &dir)).await.unwrap();
        let old_id = record.identity;
        supervisor.watch(old_id);
        crate::process::launcher::wait_for_exit(&record.exit, Duration::from_secs(5)).await;

        supervisor.check_cycle().await;

        assert!(!supervisor.registry.contains(old_id));
        assert!(!supervisor.is_watching(old_id));

        let watched = supervisor.watched();
        assert_eq!(watched.len(), 1);
        let new_id = watched[0];
        assert_ne!(new_id, old_id);

        let restarted = supervisor.registry.get(new_id).unwrap();
        assert_eq!(restarted.launch_config, record.launch_config);
        assert_eq!(restarted.restarts, 1);

        let mut running = false;
        for _ in 0..100 {
            if supervisor.registry.get(new_id).map(|r| r.status) == Some(ProcessStatus::Running) {
                running = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(running);

        supervisor.shutdown().await;
        assert!(supervisor.registry.is_empty());
    }

    #[tokio::test]
    async fn test_crash_loop_gives_up() {
        let dir = TempDir::new().unwrap();
        let supervisor = create_supervisor();

        let mut config = shell_config("exit 1", &dir);
        config.max_restarts = 2;
        config.restart_delay_ms = 0;
        let record = supervisor.launcher.launch(config).await.unwrap();
        supervisor.watch(record.identity);

        for _ in 0..40 {
            if supervisor.watched().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            supervisor.check_cycle().await;
        }

        assert!(supervisor.watched().is_empty());
        let records = supervisor.registry.list();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ProcessStatus::Failed);
        assert_eq!(records[0].restarts, 2);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let supervisor = create_supervisor();

        for _ in 0..3 {
            let record = supervisor.launcher.launch(shell_config("sleep 30", &dir)).await.unwrap();
            supervisor.watch(record.identity);
        }

        let runner = tokio::spawn(Arc::clone(&supervisor).run());

        tokio::join!(supervisor.shutdown(), supervisor.shutdown());
        supervisor.shutdown().await;

        assert!(supervisor.registry.is_empty());
        assert!(supervisor.watched().is_empty());
        assert!(supervisor.is_shutting_down());

        tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .unwrap()
            .unwrap();
    }
}
