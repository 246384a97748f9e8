//! In-memory capture of server stdout/stderr.
//!
//! Each instance gets a bounded ring buffer; two background tasks drain
//! the piped streams line by line until EOF. The buffer backs the `logs`
//! query only; rendering output elsewhere (a terminal pane, a file) is
//! the caller's concern, not this core's.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tracing::debug;

/// Maximum captured lines kept per server instance.
pub const LOG_BUFFER_CAPACITY: usize = 1000;

/// Which stream a captured line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}

/// One captured output line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub stream: StreamKind,
    pub line: String,
}

/// Shared, bounded ring buffer of captured lines.
///
/// Cloning shares the underlying buffer; the capture tasks hold one
/// clone, the instance another.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    inner: Arc<Mutex<VecDeque<LogEntry>>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(64))),
        }
    }

    fn push(&self, stream: StreamKind, line: String) {
        let mut buf = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if buf.len() == LOG_BUFFER_CAPACITY {
            buf.pop_front();
        }
        buf.push_back(LogEntry {
            timestamp: Utc::now(),
            stream,
            line,
        });
    }

    /// The last `tail` captured entries, oldest first.
    pub fn tail(&self, tail: usize) -> Vec<LogEntry> {
        let buf = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let skip = buf.len().saturating_sub(tail);
        buf.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Take the child's piped stdout/stderr and drain both into the buffer.
///
/// The tasks end on stream EOF (process exit); they hold only a clone of
/// the buffer and never touch the instance.
pub fn capture_child_output(name: &str, child: &mut Child, buffer: &LogBuffer) {
    if let Some(stdout) = child.stdout.take() {
        spawn_reader(name.to_string(), StreamKind::Stdout, stdout, buffer.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_reader(name.to_string(), StreamKind::Stderr, stderr, buffer.clone());
    }
}

fn spawn_reader<R>(name: String, stream: StreamKind, reader: R, buffer: LogBuffer)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            buffer.push(stream, line);
        }
        debug!("Log capture for '{}' {} reached EOF", name, stream);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_caps_entries() {
        let buffer = LogBuffer::new();
        for i in 0..(LOG_BUFFER_CAPACITY + 10) {
            buffer.push(StreamKind::Stdout, format!("line {}", i));
        }
        assert_eq!(buffer.len(), LOG_BUFFER_CAPACITY);
        // Oldest entries were evicted.
        let entries = buffer.tail(LOG_BUFFER_CAPACITY);
        assert_eq!(entries[0].line, "line 10");
    }

    #[test]
    fn test_tail_returns_newest() {
        let buffer = LogBuffer::new();
        buffer.push(StreamKind::Stdout, "one".to_string());
        buffer.push(StreamKind::Stderr, "two".to_string());
        buffer.push(StreamKind::Stdout, "three".to_string());

        let tail = buffer.tail(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].line, "two");
        assert_eq!(tail[1].line, "three");
        assert_eq!(tail[0].stream, StreamKind::Stderr);
    }

    #[tokio::test]
    async fn test_capture_from_real_child() {
        use devserve_process::{spawn_server, SpawnSpec};
        use std::collections::HashMap;

        let spec = SpawnSpec {
            name: "test".to_string(),
            argv: vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo out-line; echo err-line >&2".to_string(),
            ],
            working_directory: None,
            env: HashMap::new(),
        };
        let mut child = spawn_server(&spec).unwrap();
        let buffer = LogBuffer::new();
        capture_child_output("test", &mut child, &buffer);

        child.wait().await.unwrap();
        // Give the reader tasks a moment to drain.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let entries = buffer.tail(10);
        let lines: Vec<&str> = entries.iter().map(|e| e.line.as_str()).collect();
        assert!(lines.contains(&"out-line"));
        assert!(lines.contains(&"err-line"));
    }
}
