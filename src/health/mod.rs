//! Execution history and derived health.
//!
//! Health is computed on demand from the last `window` history entries and is
//! never persisted.

pub mod history;

pub use history::{ExecutionHistory, HistoryEntry};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Derived view of a subsystem's recent behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub last_execution: Option<DateTime<Utc>>,
    pub average_duration_ms: f64,
    pub success_rate: f64,
    pub error_count: usize,
    pub last_error: Option<String>,
    pub knobs_valid: bool,
}

/// Window and threshold used to judge health.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthPolicy {
    pub window: usize,
    /// Minimum success ratio over the window.
    pub threshold: f64,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            window: 10,
            threshold: 0.8,
        }
    }
}

impl HealthPolicy {
    /// Evaluate `history`. An empty history is healthy.
    pub fn evaluate(&self, history: &ExecutionHistory, knobs_valid: bool) -> HealthStatus {
        let recent: Vec<&HistoryEntry> = history.recent(self.window).collect();

        let (success_rate, average_duration_ms, error_count) = if recent.is_empty() {
            (1.0, 0.0, 0)
        } else {
            let total = recent.len() as f64;
            let successes = recent.iter().filter(|e| e.success).count();
            let duration: u64 = recent.iter().map(|e| e.duration_ms).sum();
            (
                successes as f64 / total,
                duration as f64 / total,
                recent.len() - successes,
            )
        };

        HealthStatus {
            healthy: recent.is_empty() || success_rate >= self.threshold,
            last_execution: history.last().map(|e| e.timestamp),
            average_duration_ms,
            success_rate,
            error_count,
            last_error: history.last_error().map(str::to_string),
            knobs_valid,
        }
    }
}
