use crate::error::{DevwardenError, Result};
use crate::process::output::StreamKind;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Default maximum log file size before rotation (10MB)
const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// One append-only log file with its tracked size
struct LogFile {
    path: PathBuf,
    file: File,
    size: u64,
}

impl LogFile {
    async fn open(path: PathBuf) -> Result<Self> {
        let file = open_append(&path).await?;
        let size = file.metadata().await.map(|m| m.len()).unwrap_or(0);
        Ok(Self { path, file, size })
    }

    async fn append(&mut self, entry: &[u8], max_size: u64) -> Result<()> {
        if self.size >= max_size {
            self.rotate().await?;
        }

        self.file
            .write_all(entry)
            .await
            .map_err(|e| DevwardenError::Log(format!("Failed to write to log: {}", e)))?;
        self.file
            .flush()
            .await
            .map_err(|e| DevwardenError::Log(format!("Failed to flush log: {}", e)))?;

        self.size += entry.len() as u64;
        Ok(())
    }

    /// Rename the current file with a timestamp suffix and start a fresh one
    async fn rotate(&mut self) -> Result<()> {
        let timestamp = Local::now().format("%Y%m%d-%H%M%S%.3f").to_string();
        let parent = self
            .path
            .parent()
            .ok_or_else(|| DevwardenError::Log("Invalid log file path".to_string()))?;
        let file_stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| DevwardenError::Log("Invalid log file name".to_string()))?;

        let rotated_path = parent.join(format!("{}-{}.log", file_stem, timestamp));
        tokio::fs::rename(&self.path, &rotated_path)
            .await
            .map_err(|e| DevwardenError::Log(format!("Failed to rotate log: {}", e)))?;

        self.file = open_append(&self.path).await?;
        self.size = 0;
        Ok(())
    }
}

async fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| DevwardenError::Log(format!("Failed to open {}: {}", path.display(), e)))
}

/// Mirrors one process's stdout and stderr into `stdout.log` and
/// `stderr.log` under a per-process directory, rotating by size
pub struct LogWriter {
    dir: PathBuf,
    stdout: LogFile,
    stderr: LogFile,
    max_size: u64,
}

impl LogWriter {
    /// Create the writer for a process under `<log_dir>/<name>-<pid>/`
    pub async fn new(log_dir: &Path, process_name: &str, pid: u32) -> Result<Self> {
        Self::with_max_size(log_dir, process_name, pid, DEFAULT_MAX_LOG_SIZE).await
    }

    /// Create a writer with a custom rotation threshold
    pub async fn with_max_size(
        log_dir: &Path,
        process_name: &str,
        pid: u32,
        max_size: u64,
    ) -> Result<Self> {
        let dir = log_dir.join(format!("{}-{}", sanitize(process_name), pid));

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| DevwardenError::Log(format!("Failed to create log directory: {}", e)))?;

        let stdout = LogFile::open(dir.join("stdout.log")).await?;
        let stderr = LogFile::open(dir.join("stderr.log")).await?;

        Ok(Self {
            dir,
            stdout,
            stderr,
            max_size,
        })
    }

    /// Append one captured line to the file for its stream
    pub async fn write_line(&mut self, stream: StreamKind, line: &str) -> Result<()> {
        let entry = format_log_entry(&Local::now(), line);
        let max_size = self.max_size;

        match stream {
            StreamKind::Stdout => self.stdout.append(&entry, max_size).await,
            StreamKind::Stderr => self.stderr.append(&entry, max_size).await,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stdout_path(&self) -> &Path {
        &self.stdout.path
    }

    pub fn stderr_path(&self) -> &Path {
        &self.stderr.path
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.stdout
            .file
            .flush()
            .await
            .map_err(|e| DevwardenError::Log(format!("Failed to flush stdout: {}", e)))?;
        self.stderr
            .file
            .flush()
            .await
            .map_err(|e| DevwardenError::Log(format!("Failed to flush stderr: {}", e)))?;
        Ok(())
    }
}

/// Format: `[YYYY-MM-DD HH:MM:SS.mmm] <line>\n`
fn format_log_entry(timestamp: &DateTime<Local>, line: &str) -> Vec<u8> {
    let timestamp_str = timestamp.format("%Y-%m-%d %H:%M:%S%.3f");
    let mut entry = format!("[{}] {}", timestamp_str, line).into_bytes();
    if !entry.ends_with(b"\n") {
        entry.push(b'\n');
    }
    entry
}

/// Keep directory names to a safe character set (`main:app` -> `main_app`)
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
