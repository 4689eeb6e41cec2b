// Shared helpers for the integration tests

#![allow(dead_code)]

use devwarden::config::{LaunchConfig, SupervisorConfig};
use devwarden::process::{ControlSurface, ProcessId, StatusSnapshot};
use std::future::Future;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const READY_SCRIPT: &str = "echo 'Application startup complete'; sleep 30";

pub fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        poll_interval: Duration::from_millis(50),
        readiness_poll_interval: Duration::from_millis(20),
        readiness_timeout: Duration::from_secs(3),
        grace_period: Duration::from_millis(500),
        ..SupervisorConfig::default()
    }
}

pub fn create_surface() -> ControlSurface {
    ControlSurface::new(fast_config())
}

/// Launch config running `script` under /bin/sh with no port probe
pub fn shell_config(script: &str, dir: &TempDir) -> LaunchConfig {
    let mut config = LaunchConfig::new("test:app");
    config.command = vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()];
    config.port = 0;
    config.working_dir = dir.path().to_path_buf();
    config.restart_delay_ms = 0;
    config
}

pub fn os_process_alive(identity: ProcessId) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(identity.as_u32() as i32), None).is_ok()
}

/// Poll `check` until it yields a value or `timeout` expires
pub async fn eventually<T, F, Fut>(timeout: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = check().await {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

pub fn single_entry(control: &ControlSurface) -> Option<StatusSnapshot> {
    let mut list = control.list();
    if list.len() == 1 {
        list.pop()
    } else {
        None
    }
}
