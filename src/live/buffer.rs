use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

pub const DEFAULT_LOG_CAPACITY: usize = 200;

const ERROR_MARKERS: [&str; 3] = ["ERROR", "FATAL", "CRITICAL"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Info,
    Error,
}

impl Severity {
    pub fn infer(text: &str) -> Self {
        if ERROR_MARKERS.iter().any(|marker| text.contains(marker)) {
            Severity::Error
        } else {
            Severity::Info
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    pub received_at: DateTime<Utc>,
    pub text: String,
    pub severity: Severity,
}

impl LogLine {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            received_at: Utc::now(),
            severity: Severity::infer(&text),
            text,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Most recent log lines in arrival order. The oldest line is dropped once
/// `capacity` is exceeded.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    lines: VecDeque<LogLine>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn append(&mut self, text: impl Into<String>) -> LogLine {
        let line = LogLine::new(text);
        self.lines.push_back(line.clone());
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
        }
        line
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogLine> {
        self.lines.iter()
    }

    pub fn texts(&self) -> Vec<String> {
        self.lines.iter().map(|line| line.text.clone()).collect()
    }

    pub fn snapshot(&self) -> Vec<LogLine> {
        self.lines.iter().cloned().collect()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
