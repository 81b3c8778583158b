//! Simulation run reports.

pub mod generator;

pub use generator::{generate_json_report, generate_markdown_report, write_report};

use crate::health::HealthStatus;
use crate::knobs::KnobSettings;
use crate::models::{ExecutionGroup, ExecutionResult, Frequency, Priority};
use crate::schedule::ExecutionPlan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Report output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Markdown,
    Json,
}

/// Per-system counters accumulated over a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemTally {
    pub runs: u32,
    pub successes: u32,
    pub failures: u32,
    pub skipped: u32,
    pub fallbacks_used: u32,
    pub analyses_requested: u32,
    pub analyses_failed: u32,
    pub cache_hits: u32,
    pub cache_misses: u32,
    pub timeouts_exceeded: u32,
    pub total_duration_ms: u64,
    pub events_generated: u32,
    pub scheduled_actions: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SystemTally {
    pub fn record(&mut self, result: &ExecutionResult) {
        self.runs += 1;
        if result.success {
            self.successes += 1;
        } else {
            self.failures += 1;
            self.last_error = result.error.clone();
        }

        let m = &result.metrics;
        self.fallbacks_used += m.fallbacks_used;
        self.analyses_requested += m.analyses_requested;
        self.analyses_failed += m.analyses_failed;
        self.cache_hits += m.cache_hits;
        self.cache_misses += m.cache_misses;
        if m.timeout_exceeded {
            self.timeouts_exceeded += 1;
        }
        self.total_duration_ms += result.duration_ms;
        self.events_generated += result.events_generated.len() as u32;
        self.scheduled_actions += result.scheduled_actions.len() as u32;
    }

    pub fn skip(&mut self) {
        self.skipped += 1;
    }

    pub fn average_duration_ms(&self) -> f64 {
        if self.runs == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.runs as f64
        }
    }
}

/// One subsystem's section of the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemReport {
    pub id: String,
    pub name: String,
    pub tier: u8,
    pub execution_group: ExecutionGroup,
    pub priority: Priority,
    pub frequency: Frequency,
    pub tally: SystemTally,
    pub health: HealthStatus,
    pub knobs: KnobSettings,
    pub templates: Vec<String>,
}

/// What happened in one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    pub tick: u64,
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
    /// Event types generated this tick; active next tick.
    pub events: Vec<String>,
}

/// Run-level metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub generated_at: DateTime<Utc>,
    pub ticks: u64,
    pub civilization: String,
    /// "offline" or the analysis backend in use.
    pub analysis_backend: String,
    pub duration_seconds: f64,
}

/// Complete report for a harness run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub metadata: ReportMetadata,
    pub plan: ExecutionPlan,
    pub systems: Vec<SystemReport>,
    pub ticks: Vec<TickSummary>,
}

impl SimulationReport {
    pub fn total_runs(&self) -> u32 {
        self.systems.iter().map(|s| s.tally.runs).sum()
    }

    pub fn total_failures(&self) -> u32 {
        self.systems.iter().map(|s| s.tally.failures).sum()
    }

    pub fn unhealthy_systems(&self) -> Vec<&str> {
        self.systems
            .iter()
            .filter(|s| !s.health.healthy)
            .map(|s| s.id.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExecutionMetrics;
    use serde_json::Map;

    fn result(success: bool, fallbacks: u32) -> ExecutionResult {
        ExecutionResult {
            execution_id: "e".to_string(),
            system_id: "s".to_string(),
            success,
            duration_ms: 40,
            timestamp: Utc::now(),
            game_state_updates: Map::new(),
            system_outputs: Map::new(),
            events_generated: Vec::new(),
            scheduled_actions: Vec::new(),
            metrics: ExecutionMetrics {
                fallbacks_used: fallbacks,
                timeout_exceeded: !success,
                ..Default::default()
            },
            error: (!success).then(|| "boom".to_string()),
            error_kind: None,
        }
    }

    #[test]
    fn test_tally_accumulates() {
        let mut tally = SystemTally::default();
        tally.record(&result(true, 2));
        tally.record(&result(false, 1));
        tally.skip();

        assert_eq!(tally.runs, 2);
        assert_eq!(tally.successes, 1);
        assert_eq!(tally.failures, 1);
        assert_eq!(tally.skipped, 1);
        assert_eq!(tally.fallbacks_used, 3);
        assert_eq!(tally.timeouts_exceeded, 1);
        assert_eq!(tally.average_duration_ms(), 40.0);
        assert_eq!(tally.last_error.as_deref(), Some("boom"));
    }
}
