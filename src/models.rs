//! Data model for the orchestration core.
//!
//! This module contains the structures exchanged between the external
//! scheduler and a subsystem runtime: system descriptors, per-invocation
//! contexts and results, and game events.

use crate::error::ErrorKind;
use crate::knobs::KnobSettings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// JSON object payload.
pub type Payload = Map<String, Value>;

/// Scheduling priority of a system or analysis task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "Low"),
            Priority::Medium => write!(f, "Medium"),
            Priority::High => write!(f, "High"),
            Priority::Critical => write!(f, "Critical"),
        }
    }
}

/// Scope at which a system runs. Groups execute in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionGroup {
    Civilization,
    InterCivilization,
    Galactic,
}

impl ExecutionGroup {
    pub const ALL: [ExecutionGroup; 3] = [
        ExecutionGroup::Civilization,
        ExecutionGroup::InterCivilization,
        ExecutionGroup::Galactic,
    ];
}

impl fmt::Display for ExecutionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionGroup::Civilization => write!(f, "civilization"),
            ExecutionGroup::InterCivilization => write!(f, "inter-civilization"),
            ExecutionGroup::Galactic => write!(f, "galactic"),
        }
    }
}

/// How often a system wants to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    EveryTick,
    Periodic,
    EventDriven,
    OnDemand,
    /// Unrecognized policy; treated as always eligible.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::EveryTick => write!(f, "every_tick"),
            Frequency::Periodic => write!(f, "periodic"),
            Frequency::EventDriven => write!(f, "event_driven"),
            Frequency::OnDemand => write!(f, "on_demand"),
            Frequency::Unknown => write!(f, "unknown"),
        }
    }
}

/// What caused an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Tick,
    Event,
    PlayerAction,
    AiTriggered,
}

impl TriggerType {
    /// Explicit player or AI request, as opposed to the simulation clock.
    pub fn is_explicit(&self) -> bool {
        matches!(self, TriggerType::PlayerAction | TriggerType::AiTriggered)
    }
}

/// Immutable descriptor of one subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// 1 to 3; tier 1 requires a civilization context.
    pub tier: u8,
    pub execution_group: ExecutionGroup,
    pub priority: Priority,
    pub frequency: Frequency,
    /// Minimum spacing for `Periodic` systems. Falls back to the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    /// Advisory budget; not enforced by the lifecycle.
    pub timeout_ms: u64,
    pub estimated_execution_ms: u64,
    #[serde(default)]
    pub required_knobs: Vec<String>,
    #[serde(default)]
    pub optional_knobs: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl SystemDefinition {
    /// Tier 3 galactic every-tick system with medium priority and a 30s budget.
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            tier: 3,
            execution_group: ExecutionGroup::Galactic,
            priority: Priority::Medium,
            frequency: Frequency::EveryTick,
            interval_ms: None,
            timeout_ms: 30_000,
            estimated_execution_ms: 1_000,
            required_knobs: Vec::new(),
            optional_knobs: Vec::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn tier(mut self, tier: u8, group: ExecutionGroup) -> Self {
        self.tier = tier;
        self.execution_group = group;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn periodic(mut self, interval_ms: u64) -> Self {
        self.frequency = Frequency::Periodic;
        self.interval_ms = Some(interval_ms);
        self
    }

    pub fn budget(mut self, estimated_ms: u64, timeout_ms: u64) -> Self {
        self.estimated_execution_ms = estimated_ms;
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn knobs(mut self, required: &[&str], optional: &[&str]) -> Self {
        self.required_knobs = required.iter().map(|s| s.to_string()).collect();
        self.optional_knobs = optional.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn depends_on(mut self, systems: &[&str]) -> Self {
        self.depends_on = systems.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn requires_civilization(&self) -> bool {
        self.tier == 1
    }
}

/// Something that happened in the simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    #[serde(default)]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub priority: Priority,
    #[serde(default)]
    pub processed: bool,
}

impl GameEvent {
    pub fn new(event_type: &str, source: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: format!("{}_{}", event_type, timestamp.timestamp_millis()),
            event_type: event_type.to_string(),
            source: source.to_string(),
            data: Value::Null,
            timestamp,
            priority: Priority::Medium,
            processed: false,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Read-only game state for one tick. Opaque to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStateSnapshot {
    pub tick: u64,
    pub taken_at: DateTime<Utc>,
    #[serde(default)]
    pub data: Value,
}

/// Civilization-scoped context required by tier 1 systems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CivilizationContext {
    pub id: String,
    pub name: String,
    pub total_population: u64,
    /// Named economic and social indicators (gdp, unemployment, ...).
    #[serde(default)]
    pub indicators: BTreeMap<String, f64>,
    #[serde(default)]
    pub recent_events: Vec<GameEvent>,
}

impl CivilizationContext {
    pub fn indicator(&self, name: &str, default: f64) -> f64 {
        self.indicators.get(name).copied().unwrap_or(default)
    }
}

/// Per-invocation input built by the external scheduler.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub game_state: Option<Arc<GameStateSnapshot>>,
    pub civilization: Option<Arc<CivilizationContext>>,
    /// Knob values supplied for this invocation.
    pub knob_settings: KnobSettings,
    pub trigger: TriggerType,
    pub active_events: Vec<GameEvent>,
}

impl ExecutionContext {
    pub fn new(execution_id: impl Into<String>, game_state: Arc<GameStateSnapshot>) -> Self {
        Self {
            execution_id: execution_id.into(),
            game_state: Some(game_state),
            civilization: None,
            knob_settings: KnobSettings::new(),
            trigger: TriggerType::Tick,
            active_events: Vec::new(),
        }
    }

    pub fn with_civilization(mut self, civilization: Arc<CivilizationContext>) -> Self {
        self.civilization = Some(civilization);
        self
    }

    pub fn with_knobs(mut self, knob_settings: KnobSettings) -> Self {
        self.knob_settings = knob_settings;
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerType) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_events(mut self, events: Vec<GameEvent>) -> Self {
        self.active_events = events;
        self
    }
}

/// Follow-up work requested by a system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledAction {
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_system: Option<String>,
    /// Tick offset from the current tick.
    #[serde(default)]
    pub delay_ticks: u64,
    #[serde(default)]
    pub payload: Value,
}

/// Resource and behavior counters for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub duration_ms: u64,
    /// Estimated memory of the analysis work performed.
    pub memory_bytes: u64,
    pub cache_hits: u32,
    pub cache_misses: u32,
    pub retries: u32,
    pub fallbacks_used: u32,
    pub analyses_requested: u32,
    pub analyses_failed: u32,
    /// Duration exceeded the system's declared `timeout_ms`.
    pub timeout_exceeded: bool,
}

/// Immutable outcome of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub system_id: String,
    pub success: bool,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub game_state_updates: Payload,
    pub system_outputs: Payload,
    pub events_generated: Vec<GameEvent>,
    pub scheduled_actions: Vec<ScheduledAction>,
    pub metrics: ExecutionMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::High < Priority::Critical);
    }

    #[test]
    fn test_unknown_frequency_deserializes() {
        let f: Frequency = serde_json::from_str("\"every_tick\"").unwrap();
        assert_eq!(f, Frequency::EveryTick);

        let f: Frequency = serde_json::from_str("\"hourly\"").unwrap();
        assert_eq!(f, Frequency::Unknown);
    }

    #[test]
    fn test_definition_builder() {
        let def = SystemDefinition::new("population", "Population")
            .tier(1, ExecutionGroup::Civilization)
            .periodic(300_000)
            .knobs(&["birth_rate"], &["immigration_rate"])
            .depends_on(&["economy"]);

        assert!(def.requires_civilization());
        assert_eq!(def.frequency, Frequency::Periodic);
        assert_eq!(def.interval_ms, Some(300_000));
        assert_eq!(def.required_knobs, vec!["birth_rate"]);
        assert_eq!(def.depends_on, vec!["economy"]);
    }

    #[test]
    fn test_event_serializes_type_field() {
        let event = GameEvent::new("war_declaration", "diplomacy", Utc::now());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "war_declaration");
    }

    #[test]
    fn test_trigger_explicit() {
        assert!(!TriggerType::Tick.is_explicit());
        assert!(!TriggerType::Event.is_explicit());
        assert!(TriggerType::PlayerAction.is_explicit());
        assert!(TriggerType::AiTriggered.is_explicit());
    }
}
