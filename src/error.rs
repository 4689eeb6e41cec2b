use thiserror::Error;

/// Main error type for the devwarden supervisor
#[derive(Debug, Error)]
pub enum DevwardenError {
    // Process-related errors
    #[error("Failed to launch process: {0}")]
    Launch(String),

    #[error("Process identity already registered: {0}")]
    DuplicateIdentity(String),

    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Process {0} cannot move from {1} to {2}")]
    InvalidTransition(String, String, String),

    #[error("Failed to stop process {0}: {1}")]
    Stop(String, String),

    #[error("Signal error: {0}")]
    Signal(String),

    #[error("Process {0} did not exit within the grace period")]
    ShutdownTimeout(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    // Log-related errors
    #[error("Log error: {0}")]
    Log(String),

    // IPC-related errors
    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Failed to connect to daemon: {0}")]
    Connection(String),

    #[error("IPC protocol error: {0}")]
    Protocol(String),

    #[error("Daemon not running")]
    DaemonNotRunning,

    #[error("Daemon already running")]
    DaemonAlreadyRunning,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for devwarden operations
pub type Result<T> = std::result::Result<T, DevwardenError>;
