use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: i64,
    pub level: String,
    pub message: String,
    /// Dump path the line is about, if any
    pub location: Option<String>,
}

/// Bounded ring of user-facing log lines.
#[derive(Clone)]
pub struct LogBuffer {
    buffer: Arc<Mutex<VecDeque<LogEntry>>>,
    max_entries: usize,
}

impl LogBuffer {
    pub fn new(max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(max_entries))),
            max_entries,
        }
    }

    pub fn add_log(&self, level: &str, message: String, location: Option<String>) {
        let entry = LogEntry {
            timestamp: Utc::now().timestamp(),
            level: level.to_string(),
            message,
            location,
        };

        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.max_entries {
            buffer.pop_front();
        }
        buffer.push_back(entry);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.add_log("info", message.into(), None);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.add_log("error", message.into(), None);
    }

    /// Most recent `limit` entries, oldest first.
    pub fn get_logs(&self, limit: Option<usize>) -> Vec<LogEntry> {
        let buffer = self.buffer.lock();
        let skip = match limit {
            Some(n) => buffer.len().saturating_sub(n),
            None => 0,
        };
        buffer.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}
