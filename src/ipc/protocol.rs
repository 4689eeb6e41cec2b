// IPC protocol between the devwarden CLI and the daemon
//
// One JSON object per line in each direction.

use crate::config::LaunchConfig;
use crate::error::{DevwardenError, Result};
use crate::process::{HealthStatus, ProcessId, StartOutcome, StatusSnapshot};
use serde::{Deserialize, Serialize};

/// Options for starting a process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartOptions {
    pub config: LaunchConfig,
    /// Block until the readiness probe decides
    pub wait_ready: bool,
}

/// Options for viewing captured output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogOptions {
    pub id: ProcessId,
    /// Only the last N lines; everything buffered when absent
    pub lines: Option<usize>,
}

/// All available commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Start(StartOptions),
    Stop { id: ProcessId },
    Status { id: ProcessId },
    List,
    Logs(LogOptions),
    Health { id: ProcessId },
    Shutdown,
}

/// Response data variants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseData {
    Started { id: ProcessId, outcome: StartOutcome },
    Stopped { id: ProcessId },
    /// No record with this identity (not an error)
    NotFound { id: ProcessId },
    Status(StatusSnapshot),
    ProcessList(Vec<StatusSnapshot>),
    Logs { id: ProcessId, text: String },
    Health { id: ProcessId, status: HealthStatus },
    /// Shutdown has begun; the daemon exits once everything is stopped
    ShuttingDown,
}

/// Request message from client to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub command: Command,
}

/// Response message from daemon to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub result: std::result::Result<ResponseData, String>,
}

impl Request {
    pub fn new(id: u64, command: Command) -> Self {
        Self { id, command }
    }
}

impl Response {
    pub fn success(id: u64, data: ResponseData) -> Self {
        Self {
            id,
            result: Ok(data),
        }
    }

    pub fn error(id: u64, error: String) -> Self {
        Self {
            id,
            result: Err(error),
        }
    }
}

/// Serialize a message as one newline-terminated JSON line
pub fn encode_line<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message)
        .map_err(|e| DevwardenError::Serialization(format!("Failed to serialize message: {}", e)))?;
    line.push('\n');
    Ok(line)
}

/// Parse one JSON line received from the peer
pub fn decode_line<T: for<'de> Deserialize<'de>>(line: &str) -> Result<T> {
    serde_json::from_str(line.trim())
        .map_err(|e| DevwardenError::Protocol(format!("Malformed message: {}", e)))
}
