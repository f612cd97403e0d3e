use crate::model::{unix_now_ms, AccessLogEntry, AccessOperation};
use std::collections::VecDeque;

/// Bounded FIFO of access events; the oldest entry is evicted first.
#[derive(Debug, Clone)]
pub struct AccessLog {
    capacity: usize,
    entries: VecDeque<AccessLogEntry>,
}

impl AccessLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Rebuild from persisted entries, keeping only the most recent `capacity`.
    pub fn from_entries(capacity: usize, entries: Vec<AccessLogEntry>) -> Self {
        let mut log = Self::new(capacity);
        for entry in entries {
            log.push_entry(entry);
        }
        log
    }

    pub fn record(&mut self, path: impl Into<String>, operation: AccessOperation) {
        self.push_entry(AccessLogEntry {
            path: path.into(),
            operation,
            timestamp: unix_now_ms(),
        });
    }

    fn push_entry(&mut self, entry: AccessLogEntry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Up to `n` most recent entries, newest first.
    pub fn recent(&self, n: usize) -> Vec<AccessLogEntry> {
        self.entries.iter().rev().take(n).cloned().collect()
    }

    /// All retained entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &AccessLogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
