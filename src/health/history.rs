//! Bounded execution history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Append-only ring buffer; the oldest entry is dropped once full.
#[derive(Debug, Clone)]
pub struct ExecutionHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl ExecutionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, entry: HistoryEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    /// The most recent `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &HistoryEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip)
    }

    /// Message of the most recent failed entry.
    pub fn last_error(&self) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| !e.success)
            .and_then(|e| e.error.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(success: bool, duration_ms: u64) -> HistoryEntry {
        HistoryEntry {
            timestamp: Utc::now(),
            success,
            duration_ms,
            error: (!success).then(|| format!("failed after {}ms", duration_ms)),
        }
    }

    #[test]
    fn test_capacity_bound() {
        let mut history = ExecutionHistory::new(5);
        for i in 0..6 {
            history.record(entry(true, i));
        }

        assert_eq!(history.len(), 5);
        assert_eq!(history.iter().next().unwrap().duration_ms, 1);
        assert_eq!(history.last().unwrap().duration_ms, 5);
    }

    #[test]
    fn test_recent_window() {
        let mut history = ExecutionHistory::new(10);
        for i in 0..4 {
            history.record(entry(true, i));
        }

        let recent: Vec<u64> = history.recent(2).map(|e| e.duration_ms).collect();
        assert_eq!(recent, vec![2, 3]);
        assert_eq!(history.recent(20).count(), 4);
    }

    #[test]
    fn test_last_error_skips_successes() {
        let mut history = ExecutionHistory::new(10);
        assert_eq!(history.last_error(), None);

        history.record(entry(false, 7));
        history.record(entry(true, 8));
        assert_eq!(history.last_error(), Some("failed after 7ms"));
    }
}
