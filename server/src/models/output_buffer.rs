// OutputBuffer Model
// Bounded ring buffer of recent FFmpeg output lines

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Longest line kept; FFmpeg progress output can run for a long time without a newline
const MAX_LINE_CHARS: usize = 512;

/// Shared, bounded tail of a process's output. Cloning shares the same buffer.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Append a line, dropping the oldest one when full
    pub fn push(&self, line: &str) {
        let line = match line.char_indices().nth(MAX_LINE_CHARS) {
            Some((idx, _)) => format!("{}…", &line[..idx]),
            None => line.to_string(),
        };

        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Copy of the buffered lines, oldest first
    pub fn snapshot(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Last `count` lines, oldest first
    pub fn tail(&self, count: usize) -> Vec<String> {
        let lines = self.snapshot();
        let start = lines.len().saturating_sub(count);
        lines[start..].to_vec()
    }
}
