//! Reference external scheduler.
//!
//! Drives a set of runtimes tick by tick in plan order. Events generated
//! during tick `t` become the active events of tick `t + 1`; scheduled
//! actions come back as events once their delay elapses.

use crate::error::PlanError;
use crate::knobs::KnobSettings;
use crate::models::{
    CivilizationContext, ExecutionContext, GameEvent, GameStateSnapshot, Payload, Priority,
    ScheduledAction, TriggerType,
};
use crate::report::{ReportMetadata, SimulationReport, SystemReport, SystemTally, TickSummary};
use crate::schedule::ExecutionPlan;
use crate::system::SystemRuntime;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Key under which a system may report the civilization's new population.
const PROJECTED_POPULATION: &str = "projectedPopulation";

pub struct Harness {
    /// Runtimes in plan order.
    runtimes: Vec<SystemRuntime>,
    tallies: Vec<SystemTally>,
    plan: ExecutionPlan,
    civilization: CivilizationContext,
    trigger: TriggerType,
    /// Accumulated `game_state_updates`, keyed by system id.
    world: Payload,
    pending_events: Vec<GameEvent>,
    scheduled: BTreeMap<u64, Vec<ScheduledAction>>,
    tick: u64,
    ticks: Vec<TickSummary>,
}

impl Harness {
    /// Order `runtimes` by their execution plan.
    pub fn new(
        runtimes: Vec<SystemRuntime>,
        civilization: CivilizationContext,
        trigger: TriggerType,
    ) -> Result<Self, PlanError> {
        let definitions: Vec<_> = runtimes
            .iter()
            .map(|rt| rt.system_definition().clone())
            .collect();
        let plan = ExecutionPlan::build(&definitions)?;

        let mut by_id: HashMap<String, SystemRuntime> = runtimes
            .into_iter()
            .map(|rt| (rt.id().to_string(), rt))
            .collect();
        let runtimes: Vec<_> = plan
            .order()
            .filter_map(|id| by_id.remove(id))
            .collect();

        info!(
            "Execution plan: {}",
            plan.order().collect::<Vec<_>>().join(" -> ")
        );

        Ok(Self {
            tallies: vec![SystemTally::default(); runtimes.len()],
            runtimes,
            plan,
            civilization,
            trigger,
            world: Payload::new(),
            pending_events: Vec::new(),
            scheduled: BTreeMap::new(),
            tick: 0,
            ticks: Vec::new(),
        })
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn runtimes(&self) -> &[SystemRuntime] {
        &self.runtimes
    }

    pub fn civilization(&self) -> &CivilizationContext {
        &self.civilization
    }

    /// Events that will be active in the next tick.
    pub fn pending_events(&self) -> &[GameEvent] {
        &self.pending_events
    }

    /// Apply per-system knob overrides. Unknown system ids are an error.
    pub fn apply_overrides(&mut self, overrides: &BTreeMap<String, KnobSettings>) -> Result<()> {
        for (system_id, settings) in overrides {
            let Some(runtime) = self
                .runtimes
                .iter_mut()
                .find(|rt| rt.id() == system_id.as_str())
            else {
                bail!("Knob overrides given for unknown system '{}'", system_id);
            };

            runtime
                .update_knob_settings(settings)
                .with_context(|| format!("Invalid knob overrides for system '{}'", system_id))?;
            debug!("Applied {} knob override(s) to '{}'", settings.len(), system_id);
        }
        Ok(())
    }

    /// Run every eligible system once.
    pub async fn run_tick(&mut self) -> TickSummary {
        self.tick += 1;
        let tick = self.tick;

        let mut active_events = std::mem::take(&mut self.pending_events);
        active_events.extend(self.due_actions(tick));

        let snapshot = Arc::new(GameStateSnapshot {
            tick,
            taken_at: Utc::now(),
            data: Value::Object(self.world.clone()),
        });

        let mut summary = TickSummary {
            tick,
            ..Default::default()
        };
        let mut generated = Vec::new();

        for (runtime, tally) in self.runtimes.iter_mut().zip(self.tallies.iter_mut()) {
            let mut civilization = self.civilization.clone();
            civilization.recent_events = active_events.clone();

            let context = ExecutionContext::new(
                format!("tick-{}-{}", tick, runtime.id()),
                Arc::clone(&snapshot),
            )
            .with_civilization(Arc::new(civilization))
            .with_trigger(self.trigger)
            .with_events(active_events.clone());

            if !runtime.should_execute(&context) {
                tally.skip();
                summary.skipped.push(runtime.id().to_string());
                continue;
            }

            let result = runtime.execute(&context).await;
            tally.record(&result);

            if !result.success {
                warn!(
                    "Tick {}: '{}' failed: {}",
                    tick,
                    result.system_id,
                    result.error.as_deref().unwrap_or("unknown error")
                );
                summary.failed.push(result.system_id);
                continue;
            }

            if let Some(population) = result
                .game_state_updates
                .get(PROJECTED_POPULATION)
                .and_then(Value::as_f64)
            {
                self.civilization.total_population = population.max(0.0).round() as u64;
            }
            self.world.insert(
                result.system_id.clone(),
                Value::Object(result.game_state_updates),
            );

            for action in result.scheduled_actions {
                let due = tick + action.delay_ticks.max(1);
                self.scheduled.entry(due).or_default().push(action);
            }

            summary
                .events
                .extend(result.events_generated.iter().map(|e| e.event_type.clone()));
            generated.extend(result.events_generated);
            summary.executed.push(result.system_id);
        }

        debug!(
            "Tick {}: {} executed, {} skipped, {} failed, {} event(s)",
            tick,
            summary.executed.len(),
            summary.skipped.len(),
            summary.failed.len(),
            generated.len()
        );

        self.pending_events = generated;
        self.ticks.push(summary.clone());
        summary
    }

    /// Scheduled actions that fall due at `tick`, as events.
    fn due_actions(&mut self, tick: u64) -> Vec<GameEvent> {
        let due = self.scheduled.remove(&tick).unwrap_or_default();
        let now = Utc::now();

        due.into_iter()
            .map(|action| {
                let source = action
                    .target_system
                    .clone()
                    .unwrap_or_else(|| "scheduler".to_string());
                GameEvent::new(&action.action_type, &source, now)
                    .with_data(action.payload)
                    .with_priority(Priority::Medium)
            })
            .collect()
    }

    /// Snapshot the run so far.
    pub fn report(&self, metadata: ReportMetadata) -> SimulationReport {
        let systems = self
            .runtimes
            .iter()
            .zip(self.tallies.iter())
            .map(|(runtime, tally)| {
                let definition = runtime.system_definition();
                SystemReport {
                    id: definition.id.clone(),
                    name: definition.name.clone(),
                    tier: definition.tier,
                    execution_group: definition.execution_group,
                    priority: definition.priority,
                    frequency: definition.frequency,
                    tally: tally.clone(),
                    health: runtime.health_status(),
                    knobs: runtime.current_knobs(),
                    templates: runtime
                        .templates()
                        .ids()
                        .into_iter()
                        .map(String::from)
                        .collect(),
                }
            })
            .collect();

        SimulationReport {
            metadata,
            plan: self.plan.clone(),
            systems,
            ticks: self.ticks.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knobs::KnobValue;
    use crate::system::RuntimeOptions;
    use crate::systems::reference_runtimes;

    fn civilization(indicators: &[(&str, f64)]) -> CivilizationContext {
        CivilizationContext {
            id: "civ-1".to_string(),
            name: "Terran Union".to_string(),
            total_population: 1_000_000,
            indicators: indicators
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            recent_events: Vec::new(),
        }
    }

    fn harness(indicators: &[(&str, f64)]) -> Harness {
        Harness::new(
            reference_runtimes(RuntimeOptions::default()),
            civilization(indicators),
            TriggerType::Tick,
        )
        .unwrap()
    }

    fn metadata() -> ReportMetadata {
        ReportMetadata {
            generated_at: Utc::now(),
            ticks: 2,
            civilization: "Terran Union".to_string(),
            analysis_backend: "offline".to_string(),
            duration_seconds: 0.0,
        }
    }

    #[test]
    fn test_runtimes_follow_plan() {
        let h = harness(&[]);
        let ids: Vec<_> = h.runtimes().iter().map(|rt| rt.id()).collect();
        assert_eq!(ids, h.plan().order().collect::<Vec<_>>());
        assert_eq!(ids, vec!["population", "diplomacy"]);
    }

    #[tokio::test]
    async fn test_quiet_tick_skips_event_driven_system() {
        let mut h = harness(&[]);
        let summary = h.run_tick().await;

        assert_eq!(summary.tick, 1);
        assert_eq!(summary.executed, vec!["population"]);
        assert_eq!(summary.skipped, vec!["diplomacy"]);
        assert!(summary.failed.is_empty());
        assert_eq!(h.civilization().total_population, 1_027_000);
    }

    #[tokio::test]
    async fn test_events_activate_next_tick() {
        let mut h = harness(&[("unemployment", 0.3), ("inflation", 0.2)]);

        let first = h.run_tick().await;
        assert!(first.events.contains(&"social_unrest".to_string()));
        assert_eq!(first.skipped, vec!["diplomacy"]);
        assert!(h
            .pending_events()
            .iter()
            .any(|e| e.event_type == "social_unrest"));

        let second = h.run_tick().await;
        assert!(second.executed.contains(&"diplomacy".to_string()));

        let report = h.report(metadata());
        let diplomacy = report.systems.iter().find(|s| s.id == "diplomacy").unwrap();
        assert_eq!(diplomacy.tally.runs, 1);
        assert_eq!(diplomacy.tally.skipped, 1);
        assert_eq!(report.ticks.len(), 2);
        assert!(report.unhealthy_systems().is_empty());
    }

    #[test]
    fn test_apply_overrides() {
        let mut h = harness(&[]);

        let mut overrides = BTreeMap::new();
        overrides.insert(
            "population".to_string(),
            KnobSettings::from([("birth_rate".to_string(), KnobValue::Number(0.03))]),
        );
        h.apply_overrides(&overrides).unwrap();
        assert_eq!(
            h.runtimes()[0].current_knobs()["birth_rate"],
            KnobValue::Number(0.03)
        );

        overrides.insert(
            "population".to_string(),
            KnobSettings::from([("birth_rate".to_string(), KnobValue::Number(9.0))]),
        );
        assert!(h.apply_overrides(&overrides).is_err());

        let mut unknown = BTreeMap::new();
        unknown.insert("economy".to_string(), KnobSettings::new());
        assert!(h.apply_overrides(&unknown).is_err());
    }

    #[tokio::test]
    async fn test_scheduled_actions_return_as_events() {
        let mut h = harness(&[]);
        h.scheduled.insert(
            2,
            vec![ScheduledAction {
                action_type: "war_declaration".to_string(),
                target_system: Some("diplomacy".to_string()),
                delay_ticks: 1,
                payload: Value::Null,
            }],
        );

        let first = h.run_tick().await;
        assert_eq!(first.skipped, vec!["diplomacy"]);

        let second = h.run_tick().await;
        assert!(second.executed.contains(&"diplomacy".to_string()));
    }
}
