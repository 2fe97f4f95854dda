//! Captured process output.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// One line written by a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub service: String,
    pub stream: LogStream,
    pub line: String,
    pub at_ms: u64,
}

/// Fixed-capacity ring of recent lines. Oldest lines fall off first.
#[derive(Debug)]
pub struct LogBuffer {
    lines: VecDeque<LogLine>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, line: LogLine) {
        if self.capacity == 0 {
            return;
        }
        while self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Lines oldest first.
    pub fn snapshot(&self) -> Vec<LogLine> {
        self.lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str) -> LogLine {
        LogLine {
            service: "api".into(),
            stream: LogStream::Stdout,
            line: text.into(),
            at_ms: 0,
        }
    }

    #[test]
    fn drops_oldest_when_full() {
        let mut buffer = LogBuffer::new(2);
        buffer.push(line("a"));
        buffer.push(line("b"));
        buffer.push(line("c"));

        let lines: Vec<_> = buffer.snapshot().into_iter().map(|l| l.line).collect();
        assert_eq!(lines, vec!["b", "c"]);
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut buffer = LogBuffer::new(0);
        buffer.push(line("a"));
        assert!(buffer.is_empty());
    }
}
