// CLI module - the `devwarden` command

mod output;

pub use output::print_error;

use crate::config::{default_pid_file, default_socket_path, LaunchConfig};
use crate::daemon::{DaemonManager, DaemonStopOutcome, PidFile};
use crate::error::{DevwardenError, Result};
use crate::ipc::client::IpcClient;
use crate::ipc::protocol::{Command, LogOptions, ResponseData, StartOptions};
use crate::process::ProcessId;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// devwarden - supervise local development servers
#[derive(Parser, Debug)]
#[command(name = "devwarden")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Daemon socket path
    #[arg(long, global = true, default_value_os_t = default_socket_path())]
    socket: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a development server under supervision
    Start {
        /// Application entry point, e.g. `main:app`
        entry_point: String,

        /// Display name (defaults to the entry point)
        #[arg(short, long)]
        name: Option<String>,

        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(short, long, default_value_t = 8000)]
        port: u16,

        /// Working directory (defaults to the current directory)
        #[arg(short, long)]
        cwd: Option<PathBuf>,

        /// Environment variables (KEY=VALUE format)
        #[arg(short, long)]
        env: Vec<String>,

        /// File patterns that trigger a reload
        #[arg(short, long)]
        watch: Vec<String>,

        /// Do not restart the process when it exits unexpectedly
        #[arg(long)]
        no_restart: bool,

        /// Return as soon as the process is launched
        #[arg(long)]
        no_wait: bool,

        /// Command template replacing the default uvicorn invocation
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// Stop a supervised process
    Stop { id: u32 },

    /// Show one process
    Status { id: u32 },

    /// List all supervised processes
    List,

    /// Show captured output
    Logs {
        id: u32,

        /// Number of lines to display
        #[arg(short, long)]
        lines: Option<usize>,
    },

    /// Check whether a process is still alive
    Health { id: u32 },

    /// Stop every process and the daemon
    Shutdown,

    /// Inspect or stop the daemon through its PID file
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,

        #[arg(long, default_value_os_t = default_pid_file())]
        pid_file: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum DaemonCommands {
    Status,
    Stop {
        /// Seconds to wait before SIGKILL
        #[arg(long, default_value_t = 15)]
        timeout: u64,
    },
}

impl Cli {
    /// Parse arguments, run the command and return the process exit code
    pub fn run() -> Result<i32> {
        let cli = Cli::parse();
        cli.execute()
    }

    fn execute(&self) -> Result<i32> {
        if let Commands::Daemon { command, pid_file } = &self.command {
            return run_daemon_command(command, pid_file).map(|()| 0);
        }

        let command = self.build_command()?;
        let waits_for_ready = matches!(&command, Command::Start(options) if options.wait_ready);

        let client = IpcClient::with_socket_path(&self.socket);
        let spinner = waits_for_ready.then(|| output::create_progress_bar("Waiting for readiness..."));
        let response = client.send_command(command);
        if let Some(pb) = spinner {
            pb.finish_and_clear();
        }

        let data = response?.result.map_err(DevwardenError::Other)?;
        output::print_success(&data);
        Ok(exit_code(&data))
    }

    fn build_command(&self) -> Result<Command> {
        match &self.command {
            Commands::Start {
                entry_point,
                name,
                host,
                port,
                cwd,
                env,
                watch,
                no_restart,
                no_wait,
                command,
            } => {
                let mut config = LaunchConfig::new(entry_point.clone());
                config.name = name.clone();
                config.host = host.clone();
                config.port = *port;
                config.working_dir = absolute_dir(cwd.as_deref())?;
                config.env_overrides = parse_env_vars(env)?;
                config.watch_patterns = watch.iter().cloned().collect();
                config.auto_restart = !no_restart;
                if !command.is_empty() {
                    config.command = command.clone();
                }

                Ok(Command::Start(StartOptions {
                    config,
                    wait_ready: !no_wait,
                }))
            }
            Commands::Stop { id } => Ok(Command::Stop { id: ProcessId::new(*id) }),
            Commands::Status { id } => Ok(Command::Status { id: ProcessId::new(*id) }),
            Commands::List => Ok(Command::List),
            Commands::Logs { id, lines } => Ok(Command::Logs(LogOptions {
                id: ProcessId::new(*id),
                lines: *lines,
            })),
            Commands::Health { id } => Ok(Command::Health { id: ProcessId::new(*id) }),
            Commands::Shutdown => Ok(Command::Shutdown),
            Commands::Daemon { .. } => Err(DevwardenError::Other(
                "daemon commands are not sent over IPC".to_string(),
            )),
        }
    }
}

fn run_daemon_command(command: &DaemonCommands, pid_file: &Path) -> Result<()> {
    let manager = DaemonManager::with_pid_file(PidFile::with_path(pid_file));

    match command {
        DaemonCommands::Status => {
            output::print_daemon_status(&manager.get_status());
            Ok(())
        }
        DaemonCommands::Stop { timeout } => {
            let pb = output::create_progress_bar("Stopping daemon...");
            match manager.stop_daemon(Duration::from_secs(*timeout)) {
                Ok(DaemonStopOutcome::Graceful) => {
                    output::finish_progress_success(pb, "Daemon stopped");
                    Ok(())
                }
                Ok(DaemonStopOutcome::ForceKilled) => {
                    output::finish_progress_success(pb, "Daemon force-stopped");
                    Ok(())
                }
                Err(e) => {
                    output::finish_progress_error(pb, &e.to_string());
                    Err(e)
                }
            }
        }
    }
}

/// The daemon runs elsewhere, so relative paths are resolved here
fn absolute_dir(cwd: Option<&Path>) -> Result<PathBuf> {
    let dir = match cwd {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir()?,
    };
    if dir.is_absolute() {
        Ok(dir)
    } else {
        Ok(std::env::current_dir()?.join(dir))
    }
}

/// Parse environment variables from KEY=VALUE format
fn parse_env_vars(env_vars: &[String]) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();

    for env_str in env_vars {
        match env_str.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                map.insert(key.to_string(), value.to_string());
            }
            _ => {
                return Err(DevwardenError::Config(format!(
                    "Invalid environment variable format: '{}'. Expected KEY=VALUE",
                    env_str
                )))
            }
        }
    }

    Ok(map)
}

/// Exit code for a response: non-zero when the CLI should report failure
fn exit_code(data: &ResponseData) -> i32 {
    match data {
        ResponseData::NotFound { .. } => 2,
        ResponseData::Started { outcome, .. } if !output::is_successful_start(outcome) => 3,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::StartOutcome;

    #[test]
    fn test_parse_env_vars() {
        let env_vars = vec!["APP_ENV=dev".to_string(), "DATABASE_URL=postgres://x?a=b".to_string()];
        let result = parse_env_vars(&env_vars).unwrap();
        assert_eq!(result.get("APP_ENV"), Some(&"dev".to_string()));
        assert_eq!(result.get("DATABASE_URL"), Some(&"postgres://x?a=b".to_string()));
    }

    #[test]
    fn test_parse_env_vars_invalid() {
        assert!(parse_env_vars(&["INVALID".to_string()]).is_err());
        assert!(parse_env_vars(&["=value".to_string()]).is_err());
    }

    #[test]
    fn test_build_start_command() {
        let cli = Cli::parse_from([
            "devwarden",
            "start",
            "main:app",
            "--name",
            "managed",
            "--port",
            "8001",
            "--cwd",
            "/srv/app",
            "--watch",
            "*.py",
            "--env",
            "DEBUG=1",
            "--no-restart",
        ]);

        match cli.build_command().unwrap() {
            Command::Start(options) => {
                assert!(options.wait_ready);
                let config = options.config;
                assert_eq!(config.entry_point, "main:app");
                assert_eq!(config.display_name(), "managed");
                assert_eq!(config.port, 8001);
                assert_eq!(config.working_dir, PathBuf::from("/srv/app"));
                assert!(config.watch_patterns.contains("*.py"));
                assert_eq!(config.env_overrides.get("DEBUG"), Some(&"1".to_string()));
                assert!(!config.auto_restart);
            }
            other => panic!("Expected Start, got {:?}", other),
        }
    }

    #[test]
    fn test_build_start_with_custom_command() {
        let cli = Cli::parse_from([
            "devwarden", "start", "worker", "--no-wait", "--", "node", "server.js", "{port}",
        ]);

        match cli.build_command().unwrap() {
            Command::Start(options) => {
                assert!(!options.wait_ready);
                assert_eq!(options.config.command, vec!["node", "server.js", "{port}"]);
                assert!(options.config.working_dir.is_absolute());
            }
            other => panic!("Expected Start, got {:?}", other),
        }
    }

    #[test]
    fn test_global_socket_flag() {
        let cli = Cli::parse_from(["devwarden", "list", "--socket", "/tmp/other.sock"]);
        assert_eq!(cli.socket, PathBuf::from("/tmp/other.sock"));
        assert_eq!(cli.build_command().unwrap(), Command::List);
    }

    #[test]
    fn test_exit_codes() {
        let id = ProcessId::new(1);
        assert_eq!(exit_code(&ResponseData::Stopped { id }), 0);
        assert_eq!(exit_code(&ResponseData::NotFound { id }), 2);
        assert_eq!(
            exit_code(&ResponseData::Started { id, outcome: StartOutcome::TimedOut }),
            3
        );
        assert_eq!(
            exit_code(&ResponseData::Started { id, outcome: StartOutcome::Ready }),
            0
        );
    }
}
