// IPC Client - talks to the daemon over its Unix socket

use crate::config::default_socket_path;
use crate::error::{DevwardenError, Result};
use crate::ipc::protocol::{decode_line, encode_line, Command, Request, Response};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Maximum number of connection attempts
const MAX_RETRY_ATTEMPTS: u32 = 3;

const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Blocking IPC client used by the CLI
pub struct IpcClient {
    socket_path: PathBuf,
    request_id: AtomicU64,
}

impl IpcClient {
    pub fn new() -> Self {
        Self::with_socket_path(default_socket_path())
    }

    pub fn with_socket_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            socket_path: path.as_ref().to_path_buf(),
            request_id: AtomicU64::new(1),
        }
    }

    /// Send a command and wait for its response
    ///
    /// Only connecting is retried; once a request is written it is never
    /// sent again, so a start is never launched twice.
    pub fn send_command(&self, command: Command) -> Result<Response> {
        let request_id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = Request::new(request_id, command);

        let stream = self.connect_with_retry()?;
        let response = self.exchange(stream, &request)?;

        if response.id != request_id {
            return Err(DevwardenError::Protocol(format!(
                "Response ID mismatch: expected {}, got {}",
                request_id, response.id
            )));
        }

        Ok(response)
    }

    fn connect_with_retry(&self) -> Result<UnixStream> {
        let mut attempt = 1;
        loop {
            match self.connect() {
                Ok(stream) => return Ok(stream),
                Err(DevwardenError::Connection(_)) if attempt < MAX_RETRY_ATTEMPTS => {
                    attempt += 1;
                    std::thread::sleep(RETRY_DELAY);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn exchange(&self, mut stream: UnixStream, request: &Request) -> Result<Response> {
        stream
            .write_all(encode_line(request)?.as_bytes())
            .map_err(|e| DevwardenError::Ipc(format!("Failed to write request: {}", e)))?;
        stream
            .flush()
            .map_err(|e| DevwardenError::Ipc(format!("Failed to flush stream: {}", e)))?;

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        let read = reader
            .read_line(&mut response_line)
            .map_err(|e| DevwardenError::Ipc(format!("Failed to read response: {}", e)))?;
        if read == 0 {
            return Err(DevwardenError::Connection(
                "Daemon closed the connection without responding".to_string(),
            ));
        }

        decode_line(&response_line)
    }

    fn connect(&self) -> Result<UnixStream> {
        if !self.socket_path.exists() {
            return Err(DevwardenError::DaemonNotRunning);
        }

        UnixStream::connect(&self.socket_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound => {
                DevwardenError::DaemonNotRunning
            }
            _ => DevwardenError::Connection(format!("Failed to connect to daemon: {}", e)),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Default for IpcClient {
    fn default() -> Self {
        Self::new()
    }
}
