use crate::error::{DevwardenError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Token in a command template that expands into the reload flags
pub const RELOAD_ARGS_TOKEN: &str = "{reload_args}";

/// Launch configuration for one supervised web application process
///
/// Immutable once a process has been launched from it; a restart reuses the
/// same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Display name (defaults to the entry point)
    #[serde(default)]
    pub name: Option<String>,

    /// Module/application identifier to execute, e.g. `main:app`
    pub entry_point: String,

    /// Command template; see [`LaunchConfig::command_line`]
    #[serde(default = "default_command")]
    pub command: Vec<String>,

    /// Network bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Network bind port (0 skips the pre-flight port probe)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Working directory for the process
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// Whether the supervisor restarts the process on unexpected exit
    #[serde(default = "default_auto_restart")]
    pub auto_restart: bool,

    /// File patterns the process itself should reload on
    #[serde(default)]
    pub watch_patterns: BTreeSet<String>,

    /// Environment merged over the inherited environment
    #[serde(default)]
    pub env_overrides: HashMap<String, String>,

    /// Maximum number of restarts within the restart window
    #[serde(default = "default_max_restarts")]
    pub max_restarts: usize,

    /// Base delay between consecutive restarts (in milliseconds)
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
}

// Default value functions for serde
fn default_command() -> Vec<String> {
    [
        "python3",
        "-m",
        "uvicorn",
        "{entry_point}",
        "--host",
        "{host}",
        "--port",
        "{port}",
        RELOAD_ARGS_TOKEN,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_auto_restart() -> bool {
    true
}

fn default_max_restarts() -> usize {
    10
}

fn default_restart_delay_ms() -> u64 {
    1000
}

impl LaunchConfig {
    /// Create a launch config for an entry point with every other field at its default
    pub fn new(entry_point: impl Into<String>) -> Self {
        Self {
            name: None,
            entry_point: entry_point.into(),
            command: default_command(),
            host: default_host(),
            port: default_port(),
            working_dir: default_working_dir(),
            auto_restart: default_auto_restart(),
            watch_patterns: BTreeSet::new(),
            env_overrides: HashMap::new(),
            max_restarts: default_max_restarts(),
            restart_delay_ms: default_restart_delay_ms(),
        }
    }

    /// Name used in logs, listings and log directories
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.entry_point,
        }
    }

    /// Render the command template into a program and its arguments
    ///
    /// `{entry_point}`, `{host}` and `{port}` are substituted inside every
    /// token. A token that is exactly `{reload_args}` expands to `--reload`
    /// plus one `--reload-include <pattern>` pair per watch pattern, or to
    /// nothing when no patterns are configured.
    pub fn command_line(&self) -> Result<(String, Vec<String>)> {
        let port = self.port.to_string();
        let mut rendered = Vec::with_capacity(self.command.len());

        for token in &self.command {
            if token == RELOAD_ARGS_TOKEN {
                if !self.watch_patterns.is_empty() {
                    rendered.push("--reload".to_string());
                    for pattern in &self.watch_patterns {
                        rendered.push("--reload-include".to_string());
                        rendered.push(pattern.clone());
                    }
                }
                continue;
            }

            rendered.push(
                token
                    .replace("{entry_point}", &self.entry_point)
                    .replace("{host}", &self.host)
                    .replace("{port}", &port),
            );
        }

        let mut parts = rendered.into_iter();
        let program = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| DevwardenError::ConfigValidation("command must not be empty".to_string()))?;

        Ok((program, parts.collect()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.entry_point.trim().is_empty() {
            return Err(DevwardenError::ConfigValidation(
                "entry_point must not be empty".to_string(),
            ));
        }

        if self.host.trim().is_empty() {
            return Err(DevwardenError::ConfigValidation(
                "host must not be empty".to_string(),
            ));
        }

        self.command_line()?;

        if !self.working_dir.exists() {
            return Err(DevwardenError::ConfigValidation(format!(
                "Working directory does not exist: {}",
                self.working_dir.display()
            )));
        }
        if !self.working_dir.is_dir() {
            return Err(DevwardenError::ConfigValidation(format!(
                "Working directory is not a directory: {}",
                self.working_dir.display()
            )));
        }

        Ok(())
    }

    /// Expand `$VAR` and `${VAR}` in the working directory, command and env values
    pub fn expand_env_vars(&mut self) {
        self.working_dir = expand_env_in_path(&self.working_dir);
        self.command = self.command.iter().map(|t| expand_env_in_string(t)).collect();
        self.env_overrides = self
            .env_overrides
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_in_string(v)))
            .collect();
    }

    /// Get restart delay as Duration
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

/// Expand environment variables in a string
fn expand_env_in_string(s: &str) -> String {
    if !s.contains('$') {
        return s.to_string();
    }

    // Longest names first so `$HOME` never clobbers `$HOMEDIR`
    let mut vars: Vec<(String, String)> = std::env::vars().collect();
    vars.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut result = s.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("${{{}}}", key), &value);
        result = result.replace(&format!("${}", key), &value);
    }

    result
}

fn expand_env_in_path(path: &Path) -> PathBuf {
    PathBuf::from(expand_env_in_string(&path.to_string_lossy()))
}

/// Runtime settings for the launcher, health monitor and supervisor loop
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How often the supervisor checks watched processes
    pub poll_interval: Duration,
    /// How often readiness waits re-check liveness and output
    pub readiness_poll_interval: Duration,
    /// Default budget for a process to print its readiness marker
    pub readiness_timeout: Duration,
    /// Time allowed for graceful termination before SIGKILL
    pub grace_period: Duration,
    /// Lines of captured output kept in memory per process
    pub max_output_lines: usize,
    /// Directory for per-process `stdout.log` / `stderr.log` mirrors
    pub log_dir: Option<PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorSection::default().into()
    }
}

/// `[supervisor]` section of the daemon configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSection {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_readiness_poll_interval_ms")]
    pub readiness_poll_interval_ms: u64,
    #[serde(default = "default_readiness_timeout_ms")]
    pub readiness_timeout_ms: u64,
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    #[serde(default = "default_max_output_lines")]
    pub max_output_lines: usize,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_readiness_poll_interval_ms() -> u64 {
    250
}

fn default_readiness_timeout_ms() -> u64 {
    10_000
}

fn default_grace_period_ms() -> u64 {
    5000
}

fn default_max_output_lines() -> usize {
    1000
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            readiness_poll_interval_ms: default_readiness_poll_interval_ms(),
            readiness_timeout_ms: default_readiness_timeout_ms(),
            grace_period_ms: default_grace_period_ms(),
            max_output_lines: default_max_output_lines(),
            log_dir: None,
        }
    }
}

impl From<SupervisorSection> for SupervisorConfig {
    fn from(section: SupervisorSection) -> Self {
        Self {
            poll_interval: Duration::from_millis(section.poll_interval_ms),
            readiness_poll_interval: Duration::from_millis(section.readiness_poll_interval_ms),
            readiness_timeout: Duration::from_millis(section.readiness_timeout_ms),
            grace_period: Duration::from_millis(section.grace_period_ms),
            max_output_lines: section.max_output_lines,
            log_dir: section.log_dir,
        }
    }
}

impl SupervisorSection {
    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 || self.readiness_poll_interval_ms == 0 {
            return Err(DevwardenError::ConfigValidation(
                "poll intervals must be greater than zero".to_string(),
            ));
        }
        if self.max_output_lines == 0 {
            return Err(DevwardenError::ConfigValidation(
                "max_output_lines must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Daemon configuration file (TOML or JSON)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    #[serde(default)]
    pub supervisor: SupervisorSection,

    /// Applications started in order when the daemon boots
    #[serde(default)]
    pub apps: Vec<LaunchConfig>,
}

pub fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/devwarden.sock")
}

pub fn default_pid_file() -> PathBuf {
    PathBuf::from("/tmp/devwarden.pid")
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            pid_file: default_pid_file(),
            supervisor: SupervisorSection::default(),
            apps: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Load the daemon configuration from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| DevwardenError::Config(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let mut config: DaemonConfig = match extension {
            "toml" => toml::from_str(&contents)
                .map_err(|e| DevwardenError::InvalidConfig(format!("Failed to parse TOML: {}", e)))?,
            "json" => serde_json::from_str(&contents)
                .map_err(|e| DevwardenError::InvalidConfig(format!("Failed to parse JSON: {}", e)))?,
            _ => {
                return Err(DevwardenError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        for app in &mut config.apps {
            app.expand_env_vars();
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate the supervisor section and every boot app
    pub fn validate(&self) -> Result<()> {
        self.supervisor.validate()?;
        for app in &self.apps {
            app.validate()?;
        }
        Ok(())
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        self.supervisor.clone().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_launch_config_defaults() {
        let config: LaunchConfig = serde_json::from_str(r#"{"entry_point": "main:app"}"#).unwrap();

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8000);
        assert!(config.auto_restart);
        assert_eq!(config.max_restarts, 10);
        assert_eq!(config.restart_delay(), Duration::from_secs(1));
        assert_eq!(config.display_name(), "main:app");
        assert_eq!(config, LaunchConfig::new("main:app"));
    }

    #[test]
    fn test_command_line_default_template() {
        let mut config = LaunchConfig::new("main:app");
        config.port = 8001;

        let (program, args) = config.command_line().unwrap();
        assert_eq!(program, "python3");
        assert_eq!(
            args,
            vec!["-m", "uvicorn", "main:app", "--host", "127.0.0.1", "--port", "8001"]
        );
    }

    #[test]
    fn test_command_line_reload_args() {
        let mut config = LaunchConfig::new("main:app");
        config.watch_patterns.insert("*.py".to_string());
        config.watch_patterns.insert("*.css".to_string());

        let (_, args) = config.command_line().unwrap();
        let tail: Vec<&str> = args.iter().skip(7).map(|s| s.as_str()).collect();
        assert_eq!(
            tail,
            vec!["--reload", "--reload-include", "*.css", "--reload-include", "*.py"]
        );
    }

    #[test]
    fn test_command_line_custom_template() {
        let mut config = LaunchConfig::new("worker");
        config.port = 9000;
        config.command = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "echo {entry_point} on {host}:{port}".to_string(),
        ];

        let (program, args) = config.command_line().unwrap();
        assert_eq!(program, "/bin/sh");
        assert_eq!(args[1], "echo worker on 127.0.0.1:9000");
    }

    #[test]
    fn test_command_line_empty() {
        let mut config = LaunchConfig::new("main:app");
        config.command = vec![];
        assert!(matches!(
            config.command_line(),
            Err(DevwardenError::ConfigValidation(_))
        ));
    }

    #[test]
    fn test_validate_missing_working_dir() {
        let mut config = LaunchConfig::new("main:app");
        config.working_dir = PathBuf::from("/nonexistent/devwarden/dir");

        assert!(matches!(
            config.validate(),
            Err(DevwardenError::ConfigValidation(_))
        ));
    }

    #[test]
    fn test_validate_empty_entry_point() {
        let config = LaunchConfig::new("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("DEVWARDEN_TEST_DIR", "/tmp");
        std::env::set_var("DEVWARDEN_TEST_DIR_LONG", "/var");
        std::env::set_var("DEVWARDEN_TEST_VALUE", "value");

        let mut config = LaunchConfig::new("main:app");
        config.working_dir = PathBuf::from("${DEVWARDEN_TEST_DIR}");
        config.command = vec!["$DEVWARDEN_TEST_DIR_LONG/bin/app".to_string()];
        config
            .env_overrides
            .insert("KEY".to_string(), "$DEVWARDEN_TEST_VALUE".to_string());

        config.expand_env_vars();

        assert_eq!(config.working_dir, PathBuf::from("/tmp"));
        assert_eq!(config.command[0], "/var/bin/app");
        assert_eq!(config.env_overrides.get("KEY"), Some(&"value".to_string()));
    }

    #[test]
    fn test_daemon_config_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("devwarden.toml");

        let toml_content = format!(
            r#"
            socket_path = "/tmp/test-devwarden.sock"

            [supervisor]
            poll_interval_ms = 200
            grace_period_ms = 1500

            [[apps]]
            name = "managed"
            entry_point = "main:app"
            port = 8001
            working_dir = "{}"
            watch_patterns = ["*.py", "*.html"]

            [[apps]]
            name = "designer"
            entry_point = "appdesigner.main:app"
            auto_restart = false
            "#,
            temp_dir.path().display()
        );
        fs::write(&config_path, toml_content).unwrap();

        let config = DaemonConfig::from_file(&config_path).unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/test-devwarden.sock"));
        assert_eq!(config.pid_file, default_pid_file());
        assert_eq!(config.apps.len(), 2);
        assert_eq!(config.apps[0].display_name(), "managed");
        assert_eq!(config.apps[0].watch_patterns.len(), 2);
        assert!(!config.apps[1].auto_restart);

        let supervisor = config.supervisor_config();
        assert_eq!(supervisor.poll_interval, Duration::from_millis(200));
        assert_eq!(supervisor.grace_period, Duration::from_millis(1500));
        assert_eq!(supervisor.readiness_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_daemon_config_from_json() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("devwarden.json");

        fs::write(
            &config_path,
            r#"{ "apps": [ { "entry_point": "main:app", "port": 0 } ] }"#,
        )
        .unwrap();

        let config = DaemonConfig::from_file(&config_path).unwrap();
        assert_eq!(config.apps.len(), 1);
        assert_eq!(config.apps[0].port, 0);
        assert_eq!(config.supervisor.max_output_lines, 1000);
    }

    #[test]
    fn test_daemon_config_rejects_zero_interval() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("devwarden.toml");
        fs::write(&config_path, "[supervisor]\npoll_interval_ms = 0\n").unwrap();

        let result = DaemonConfig::from_file(&config_path);
        assert!(matches!(result, Err(DevwardenError::ConfigValidation(_))));
    }

    #[test]
    fn test_daemon_config_unsupported_format() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("devwarden.yaml");
        fs::write(&config_path, "apps: []").unwrap();

        let result = DaemonConfig::from_file(&config_path);
        assert!(matches!(result, Err(DevwardenError::InvalidConfig(_))));
    }
}
