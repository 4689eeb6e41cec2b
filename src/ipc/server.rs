// IPC Server - accepts CLI connections on a Unix socket

use crate::config::default_socket_path;
use crate::error::{DevwardenError, Result};
use crate::ipc::protocol::{decode_line, encode_line, Command, Request, Response, ResponseData};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;

/// Longest request line a client may send, excluding the newline
const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// IPC server for handling client connections
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
}

impl IpcServer {
    pub fn new() -> Self {
        Self::with_socket_path(default_socket_path())
    }

    pub fn with_socket_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            socket_path: path.as_ref().to_path_buf(),
            listener: None,
        }
    }

    /// Bind the Unix socket, replacing a stale socket file
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                DevwardenError::Ipc(format!("Failed to remove existing socket: {}", e))
            })?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| DevwardenError::Ipc(format!("Failed to bind to socket: {}", e)))?;

        // Owner-only access
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.socket_path, permissions).map_err(|e| {
                DevwardenError::Ipc(format!("Failed to set socket permissions: {}", e))
            })?;
        }

        tracing::info!(socket = %self.socket_path.display(), "IPC server listening");
        self.listener = Some(listener);
        Ok(())
    }

    /// Accept connections until `shutdown` turns true
    ///
    /// Every connection gets its own task; each request line is answered
    /// with exactly one response line carrying the same id.
    pub async fn run<F, Fut>(&self, handler: F, mut shutdown: watch::Receiver<bool>) -> Result<()>
    where
        F: Fn(Command) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResponseData>> + Send,
    {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| DevwardenError::Ipc("Server not started".to_string()))?;
        let handler = Arc::new(handler);

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, handler).await {
                                tracing::warn!("IPC connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => tracing::error!("Failed to accept connection: {}", e),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("IPC server stopped accepting connections");
        Ok(())
    }

    /// Stop listening and remove the socket file
    pub fn stop(&mut self) -> Result<()> {
        self.listener = None;

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                DevwardenError::Ipc(format!("Failed to remove socket file: {}", e))
            })?;
        }

        Ok(())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Default for IpcServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if self.listener.is_some() {
            let _ = self.stop();
        }
    }
}

async fn handle_connection<F, Fut>(stream: UnixStream, handler: Arc<F>) -> Result<()>
where
    F: Fn(Command) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ResponseData>> + Send,
{
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = (&mut reader)
            .take(MAX_REQUEST_BYTES as u64 + 1)
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| DevwardenError::Ipc(format!("Failed to read request: {}", e)))?;
        if read == 0 {
            break;
        }

        if !buf.ends_with(b"\n") && buf.len() > MAX_REQUEST_BYTES {
            let message = format!("Request exceeds {} bytes", MAX_REQUEST_BYTES);
            write_response(&mut writer, &Response::error(0, message.clone())).await?;
            return Err(DevwardenError::Protocol(message));
        }

        let line = String::from_utf8_lossy(&buf);
        if line.trim().is_empty() {
            continue;
        }

        let response = match decode_line::<Request>(&line) {
            Ok(request) => {
                tracing::debug!(request_id = request.id, command = ?request.command, "IPC request");
                match handler(request.command).await {
                    Ok(data) => Response::success(request.id, data),
                    Err(e) => Response::error(request.id, e.to_string()),
                }
            }
            Err(e) => Response::error(0, e.to_string()),
        };

        write_response(&mut writer, &response).await?;
    }

    Ok(())
}

async fn write_response(writer: &mut OwnedWriteHalf, response: &Response) -> Result<()> {
    writer
        .write_all(encode_line(response)?.as_bytes())
        .await
        .map_err(|e| DevwardenError::Ipc(format!("Failed to write response: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| DevwardenError::Ipc(format!("Failed to flush stream: {}", e)))
}
