// The daemon proper: control surface + supervisor loop + IPC server

use super::manager::DaemonManager;
use super::pid::PidFile;
use crate::config::DaemonConfig;
use crate::error::{DevwardenError, Result};
use crate::ipc::protocol::{Command, ResponseData};
use crate::ipc::IpcServer;
use crate::process::{ControlSurface, StartOutcome, StopOutcome};
use std::sync::Arc;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct Daemon {
    config: DaemonConfig,
    control: Arc<ControlSurface>,
    manager: DaemonManager,
    shutdown_tx: watch::Sender<bool>,
}

impl Daemon {
    pub fn new(config: DaemonConfig) -> Self {
        let control = Arc::new(ControlSurface::new(config.supervisor_config()));
        let manager = DaemonManager::with_pid_file(PidFile::with_path(&config.pid_file));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            control,
            manager,
            shutdown_tx,
        }
    }

    pub fn control(&self) -> &Arc<ControlSurface> {
        &self.control
    }

    /// Handle that makes `run` return as if a shutdown command arrived
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    /// Serve until SIGINT, SIGTERM or an IPC shutdown, then stop every
    /// supervised process
    ///
    /// Boot apps are started first, in order, each waiting for readiness.
    /// If one does not become ready everything is torn down and the error
    /// is returned. The PID file and socket are removed on every exit path.
    pub async fn run(self) -> Result<()> {
        self.manager.register_daemon()?;
        info!(pid = std::process::id(), "Starting devwarden daemon");

        let mut ipc_server = IpcServer::with_socket_path(&self.config.socket_path);
        let result = match ipc_server.start() {
            Ok(()) => self.serve(ipc_server).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            error!("Daemon stopped after error: {}", e);
        }

        if let Err(e) = self.manager.unregister_daemon() {
            warn!("Failed to remove PID file: {}", e);
        }
        info!("Daemon stopped");

        result
    }

    async fn serve(&self, ipc_server: IpcServer) -> Result<()> {
        // Trapped before anything is spawned so a signal always reaches teardown
        let mut signals = ShutdownSignals::new(self.shutdown_tx.subscribe())?;

        let supervisor = Arc::clone(self.control.supervisor());
        let supervisor_task = tokio::spawn(supervisor.run());

        let control = Arc::clone(&self.control);
        let shutdown_tx = self.shutdown_tx.clone();
        let server_shutdown = self.shutdown_tx.subscribe();
        let server_task = tokio::spawn(async move {
            let result = ipc_server
                .run(
                    move |command| {
                        let control = Arc::clone(&control);
                        let shutdown_tx = shutdown_tx.clone();
                        async move { handle_command(&control, &shutdown_tx, command).await }
                    },
                    server_shutdown,
                )
                .await;

            if let Err(e) = result {
                error!("IPC server error: {}", e);
            }
        });

        let booted = tokio::select! {
            booted = self.boot_apps() => Some(booted),
            _ = signals.recv() => None,
        };

        let outcome = match booted {
            Some(Ok(())) => {
                signals.recv().await;
                Ok(())
            }
            Some(Err(e)) => Err(e),
            None => {
                info!("Shutdown requested while boot apps were starting");
                Ok(())
            }
        };

        self.shutdown_tx.send_replace(true);
        let _ = server_task.await;
        self.control.shutdown().await;
        let _ = supervisor_task.await;

        outcome
    }

    async fn boot_apps(&self) -> Result<()> {
        for app in &self.config.apps {
            let name = app.display_name().to_string();
            info!(name = %name, port = app.port, "Starting boot app");

            let report = self.control.start(app.clone(), true).await?;
            match report.outcome {
                StartOutcome::Ready | StartOutcome::Started => {
                    info!(pid = %report.identity, name = %name, "Boot app is ready");
                }
                StartOutcome::TimedOut => {
                    return Err(DevwardenError::Launch(format!(
                        "boot app '{}' did not become ready in time",
                        name
                    )));
                }
                StartOutcome::Failed(reason) => {
                    return Err(DevwardenError::Launch(format!(
                        "boot app '{}' failed to start: {}",
                        name, reason
                    )));
                }
            }
        }
        Ok(())
    }
}

/// SIGINT, SIGTERM and the IPC shutdown flag, merged into one wait
struct ShutdownSignals {
    sigterm: Signal,
    sigint: Signal,
    requested: watch::Receiver<bool>,
}

impl ShutdownSignals {
    fn new(requested: watch::Receiver<bool>) -> Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
            requested,
        })
    }

    /// Resolve when a signal arrives or the shutdown flag is raised
    async fn recv(&mut self) {
        let requested = &mut self.requested;
        tokio::select! {
            _ = self.sigterm.recv() => info!("Received SIGTERM"),
            _ = self.sigint.recv() => info!("Received SIGINT"),
            _ = async {
                let _ = requested.wait_for(|requested| *requested).await;
            } => info!("Shutdown requested over IPC"),
        }
    }
}

/// Execute one IPC command against the control surface
pub async fn handle_command(
    control: &ControlSurface,
    shutdown_tx: &watch::Sender<bool>,
    command: Command,
) -> Result<ResponseData> {
    match command {
        Command::Start(options) => {
            let mut config = options.config;
            config.expand_env_vars();
            let report = control.start(config, options.wait_ready).await?;
            Ok(ResponseData::Started {
                id: report.identity,
                outcome: report.outcome,
            })
        }
        Command::Stop { id } => match control.stop(id).await? {
            StopOutcome::Stopped => Ok(ResponseData::Stopped { id }),
            StopOutcome::NotFound => Ok(ResponseData::NotFound { id }),
        },
        Command::Status { id } => Ok(match control.status(id) {
            Some(snapshot) => ResponseData::Status(snapshot),
            None => ResponseData::NotFound { id },
        }),
        Command::List => Ok(ResponseData::ProcessList(control.list())),
        Command::Logs(options) => Ok(match control.logs(options.id, options.lines) {
            Some(text) => ResponseData::Logs { id: options.id, text },
            None => ResponseData::NotFound { id: options.id },
        }),
        Command::Health { id } => {
            let status = control.health(id).await?;
            Ok(ResponseData::Health { id, status })
        }
        Command::Shutdown => {
            shutdown_tx.send_replace(true);
            Ok(ResponseData::ShuttingDown)
        }
    }
}
