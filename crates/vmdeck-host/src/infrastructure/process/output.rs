//! Bounded capture of emulator output.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::debug;

/// Default number of lines kept per process.
pub const DEFAULT_TAIL_LINES: usize = 64;

/// The last few lines a process wrote to stdout or stderr.
///
/// Cloning shares the same buffer.
#[derive(Debug, Clone)]
pub struct OutputTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl OutputTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Appends a line, evicting the oldest one when full.
    pub fn push(&self, line: String) {
        if self.capacity == 0 {
            return;
        }
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// The captured lines joined with newlines.
    pub fn snapshot(&self) -> String {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }

    /// Reads `stream` line by line until EOF, echoing each line at debug
    /// level and keeping it in the tail.
    pub async fn drain<R>(self, stream: R, machine: String, source: &'static str)
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    debug!(machine = %machine, source, "{line}");
                    self.push(line);
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(machine = %machine, source, error = %e, "output stream closed");
                    break;
                }
            }
        }
    }
}

impl Default for OutputTail {
    fn default() -> Self {
        Self::new(DEFAULT_TAIL_LINES)
    }
}
