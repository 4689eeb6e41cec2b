use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Which standard stream a captured line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}

/// A single line of captured output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: StreamKind,
    pub text: String,
}

/// Bounded, append-only buffer of a process's captured stdout/stderr
///
/// Cloning shares the buffer. The launcher's writer task is the only
/// writer; readers copy text out under a short lock and may observe the two
/// streams interleaved.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug)]
struct Inner {
    lines: VecDeque<OutputLine>,
    max_lines: usize,
    total_lines: u64,
}

impl OutputBuffer {
    /// Create a buffer that keeps at most `max_lines` lines
    pub fn new(max_lines: usize) -> Self {
        let max_lines = max_lines.max(1);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                lines: VecDeque::with_capacity(max_lines.min(1024)),
                max_lines,
                total_lines: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a line, evicting the oldest one when full
    pub fn push(&self, stream: StreamKind, text: impl Into<String>) {
        let mut inner = self.lock();
        if inner.lines.len() == inner.max_lines {
            inner.lines.pop_front();
        }
        inner.lines.push_back(OutputLine {
            stream,
            text: text.into(),
        });
        inner.total_lines += 1;
    }

    /// All buffered output as one newline-joined string
    pub fn text(&self) -> String {
        let inner = self.lock();
        let mut text = String::new();
        for line in &inner.lines {
            text.push_str(&line.text);
            text.push('\n');
        }
        text
    }

    /// The last `n` buffered lines, oldest first
    pub fn tail(&self, n: usize) -> Vec<OutputLine> {
        let inner = self.lock();
        let skip = inner.lines.len().saturating_sub(n);
        inner.lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().lines.is_empty()
    }

    /// Number of lines ever appended, including evicted ones
    pub fn total_lines(&self) -> u64 {
        self.lock().total_lines
    }
}
