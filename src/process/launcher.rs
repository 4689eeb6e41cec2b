use crate::config::{LaunchConfig, SupervisorConfig};
use crate::error::{DevwardenError, Result};
use crate::logs::LogWriter;
use crate::process::output::{OutputBuffer, StreamKind};
use crate::process::registry::ProcessRegistry;
use crate::process::types::{ExitInfo, ExitWatch, ProcessId, ProcessRecord};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};

/// How long to wait for the reaper after SIGKILL before giving up
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Capacity of the channel between stream readers and the output writer
const OUTPUT_CHANNEL_CAPACITY: usize = 1024;

/// How a termination request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// The process had already exited before it was signalled
    AlreadyExited,
    /// The process exited within the grace period
    Graceful,
    /// The grace period expired and the process group was killed
    ForceKilled,
}

/// Starts supervised OS processes and registers them
pub struct ProcessLauncher {
    registry: Arc<ProcessRegistry>,
    max_output_lines: usize,
    log_dir: Option<PathBuf>,
}

impl ProcessLauncher {
    pub fn new(registry: Arc<ProcessRegistry>, config: &SupervisorConfig) -> Self {
        Self {
            registry,
            max_output_lines: config.max_output_lines,
            log_dir: config.log_dir.clone(),
        }
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// Spawn a process for `config` and register it as `Starting`
    ///
    /// The child runs in its own process group with stdin closed and both
    /// output streams captured into the record's output buffer (and the
    /// log mirror when a log directory is configured).
    ///
    /// # Returns
    /// * `Ok(ProcessRecord)` - snapshot of the registered record
    /// * `Err(DevwardenError::Launch)` - bad working directory, port in use,
    ///   or the command could not be executed
    /// * `Err(DevwardenError::DuplicateIdentity)` - the registry already held
    ///   the new pid; the new process has been killed
    pub async fn launch(&self, config: LaunchConfig) -> Result<ProcessRecord> {
        self.launch_generation(config, 0).await
    }

    /// Launch a replacement for a crashed process, carrying its restart count
    pub(crate) async fn relaunch(&self, config: LaunchConfig, restarts: usize) -> Result<ProcessRecord> {
        self.launch_generation(config, restarts).await
    }

    async fn launch_generation(&self, config: LaunchConfig, restarts: usize) -> Result<ProcessRecord> {
        config.validate().map_err(|e| match e {
            DevwardenError::ConfigValidation(msg) => DevwardenError::Launch(msg),
            other => other,
        })?;
        check_port(&config)?;

        let name = config.display_name().to_string();
        let mut command = build_command(&config)?;

        let mut child = command.spawn().map_err(|e| {
            DevwardenError::Launch(format!("Failed to spawn process '{}': {}", name, e))
        })?;

        let pid = child.id().ok_or_else(|| {
            DevwardenError::Launch(format!("Failed to get PID for process '{}'", name))
        })?;
        let identity = ProcessId::new(pid);

        let output = OutputBuffer::new(self.max_output_lines);
        self.capture_output(&mut child, identity, &name, output.clone());
        let exit = spawn_reaper(child, identity);

        let mut record = ProcessRecord::new(identity, config, output, exit);
        record.restarts = restarts;

        if let Err(e) = self.registry.register(record.clone()) {
            let _ = signal_group(identity, Signal::SIGKILL);
            wait_for_exit(&record.exit, KILL_WAIT).await;
            return Err(e);
        }

        tracing::info!(pid = %identity, name = %name, restarts, "Launched process");
        Ok(record)
    }

    /// Route the child's stdout and stderr into `output` through a single writer task
    fn capture_output(&self, child: &mut Child, identity: ProcessId, name: &str, output: OutputBuffer) {
        let (tx, mut rx) = mpsc::channel::<(StreamKind, String)>(OUTPUT_CHANNEL_CAPACITY);

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(read_stream(StreamKind::Stdout, stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(read_stream(StreamKind::Stderr, stderr, tx));
        }

        let log_dir = self.log_dir.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            let mut writer = match log_dir {
                Some(dir) => match LogWriter::new(&dir, &name, identity.as_u32()).await {
                    Ok(writer) => Some(writer),
                    Err(e) => {
                        tracing::warn!(pid = %identity, "Log mirror disabled: {}", e);
                        None
                    }
                },
                None => None,
            };

            while let Some((stream, line)) = rx.recv().await {
                output.push(stream, line.as_str());
                if let Some(w) = writer.as_mut() {
                    if let Err(e) = w.write_line(stream, &line).await {
                        tracing::warn!(pid = %identity, "Failed to mirror output: {}", e);
                        writer = None;
                    }
                }
            }

            if let Some(mut w) = writer {
                let _ = w.flush().await;
            }
        });
    }

    /// Stop a process: SIGTERM to its group, wait up to `grace`, then SIGKILL
    ///
    /// After a graceful exit the rest of the process group is killed, so no
    /// grandchildren outlive the supervised process. A process that had
    /// already been reaped is not signalled at all: its group id may belong
    /// to an unrelated process by now.
    pub async fn terminate(&self, record: &ProcessRecord, grace: Duration) -> Result<TerminateOutcome> {
        let identity = record.identity;

        if record.has_exited() {
            return Ok(TerminateOutcome::AlreadyExited);
        }

        tracing::info!(pid = %identity, name = %record.name(), "Sending SIGTERM to process group");
        if !signal_group(identity, Signal::SIGTERM)? {
            wait_for_exit(&record.exit, KILL_WAIT).await;
            return Ok(TerminateOutcome::AlreadyExited);
        }

        if wait_for_exit(&record.exit, grace).await {
            // The group id stays reserved while any member is alive
            let _ = signal_group(identity, Signal::SIGKILL);
            tracing::info!(pid = %identity, "Process exited gracefully");
            return Ok(TerminateOutcome::Graceful);
        }

        tracing::warn!(
            pid = %identity,
            "{}, sending SIGKILL",
            DevwardenError::ShutdownTimeout(identity.to_string())
        );
        signal_group(identity, Signal::SIGKILL)?;

        if !wait_for_exit(&record.exit, KILL_WAIT).await {
            return Err(DevwardenError::Stop(
                identity.to_string(),
                "process did not exit after SIGKILL".to_string(),
            ));
        }

        Ok(TerminateOutcome::ForceKilled)
    }
}

fn build_command(config: &LaunchConfig) -> Result<Command> {
    let (program, args) = config.command_line()?;

    let mut command = std::process::Command::new(&program);
    command
        .args(&args)
        .current_dir(&config.working_dir)
        .env("DEVWARDEN_HOST", &config.host)
        .env("DEVWARDEN_PORT", config.port.to_string())
        .env(
            "DEVWARDEN_WATCH_PATTERNS",
            config
                .watch_patterns
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(","),
        )
        .envs(&config.env_overrides)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Own process group so reloaders and their workers are signalled together
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut command = Command::from(command);
    command.kill_on_drop(true);
    Ok(command)
}

/// Fail fast when something is already listening on the configured port
fn check_port(config: &LaunchConfig) -> Result<()> {
    if config.port == 0 {
        return Ok(());
    }

    match std::net::TcpListener::bind((config.host.as_str(), config.port)) {
        Ok(_listener) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => Err(DevwardenError::Launch(format!(
            "Port {}:{} is already in use",
            config.host, config.port
        ))),
        Err(e) => Err(DevwardenError::Launch(format!(
            "Cannot bind {}:{}: {}",
            config.host, config.port, e
        ))),
    }
}

async fn read_stream<R>(stream: StreamKind, reader: R, tx: mpsc::Sender<(StreamKind, String)>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']).to_string();
                if tx.send((stream, line)).await.is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

/// Own the child until it exits and publish its exit status
fn spawn_reaper(mut child: Child, identity: ProcessId) -> ExitWatch {
    let (tx, rx) = watch::channel(None);

    tokio::spawn(async move {
        let info = match child.wait().await {
            Ok(status) => ExitInfo::from_status(status),
            Err(e) => {
                tracing::warn!(pid = %identity, "Failed to wait for process: {}", e);
                ExitInfo {
                    code: None,
                    signal: None,
                    exited_at: std::time::SystemTime::now(),
                }
            }
        };
        tracing::debug!(pid = %identity, "Process exited with {}", info);
        tx.send_replace(Some(info));
    });

    rx
}

/// Wait until the reaper reports an exit; false if `limit` elapsed first
pub(crate) async fn wait_for_exit(exit: &ExitWatch, limit: Duration) -> bool {
    let mut exit = exit.clone();
    let waited = tokio::time::timeout(limit, async move {
        // A dropped sender means the reaper is gone along with the child
        let _ = exit.wait_for(Option::is_some).await.map(|_| ());
    })
    .await;
    waited.is_ok()
}

/// Signal a whole process group; Ok(false) when the group no longer exists
fn signal_group(identity: ProcessId, signal: Signal) -> Result<bool> {
    match killpg(Pid::from_raw(identity.as_u32() as i32), signal) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(DevwardenError::Signal(format!(
            "Failed to send {} to process group {}: {}",
            signal, identity, e
        ))),
    }
}
