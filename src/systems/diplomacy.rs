//! Relations between civilizations, driven by diplomatic events.

use crate::analysis::{AptTemplate, Complexity, TemplateRegistry};
use crate::knobs::{KnobDefinition, KnobRegistry};
use crate::models::{
    ExecutionContext, ExecutionGroup, Frequency, GameEvent, Priority, ScheduledAction,
    SystemDefinition,
};
use crate::system::{DomainOutput, DomainScope, Subsystem};
use crate::systems::{event_time, number, payload};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use tracing::{debug, warn};

pub const SYSTEM_ID: &str = "diplomacy";

const STRATEGY_TEMPLATE: &str = "diplomatic-strategy-analysis";
const TRADE_TEMPLATE: &str = "trade-opportunity-analysis";

pub const STANCES: [&str; 4] = ["isolationist", "neutral", "cooperative", "expansionist"];

/// Most recent agreements kept as active.
const MAX_AGREEMENTS: usize = 16;

const RELEVANT_EVENTS: &[&str] = &[
    "war_declaration",
    "peace_treaty",
    "trade_agreement",
    "social_unrest",
];

/// Tension, trust and trade carried between ticks.
#[derive(Debug)]
pub struct DiplomacySystem {
    tension: f64,
    trust: f64,
    trade_volume: f64,
    agreements: VecDeque<String>,
}

impl Default for DiplomacySystem {
    fn default() -> Self {
        Self {
            tension: 0.2,
            trust: 0.5,
            trade_volume: 0.0,
            agreements: VecDeque::new(),
        }
    }
}

impl DiplomacySystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tension(&self) -> f64 {
        self.tension
    }

    fn record_agreement(&mut self, agreement: String) {
        if self.agreements.len() == MAX_AGREEMENTS {
            self.agreements.pop_front();
        }
        self.agreements.push_back(agreement);
    }
}

/// How strongly hostile events move tension under a stance.
fn stance_factor(stance: &str) -> f64 {
    match stance {
        "isolationist" => 0.5,
        "cooperative" => 0.75,
        "expansionist" => 1.5,
        _ => 1.0,
    }
}

fn fallback_strategy(stance: &str, tension: f64) -> Value {
    let recommended = if tension > 0.7 {
        if stance == "expansionist" {
            "expansionist"
        } else {
            "isolationist"
        }
    } else if tension < 0.3 {
        "cooperative"
    } else {
        stance
    };

    json!({
        "recommendedStance": recommended,
        "tensionAdjustment": 0.0,
        "actions": ["Maintain open channels"],
        "confidence": 0.4,
    })
}

#[async_trait]
impl Subsystem for DiplomacySystem {
    fn definition(&self) -> SystemDefinition {
        SystemDefinition::new(SYSTEM_ID, "Inter-Civilization Diplomacy")
            .description("Diplomatic relations, conflicts and trade agreements")
            .tier(2, ExecutionGroup::InterCivilization)
            .priority(Priority::Medium)
            .frequency(Frequency::EventDriven)
            .budget(1_500, 20_000)
            .knobs(
                &["diplomatic_stance"],
                &[
                    "trade_openness",
                    "conflict_escalation_tolerance",
                    "alliance_reliability",
                    "peacekeeping_commitment",
                ],
            )
            .depends_on(&["population"])
    }

    fn initialize_knobs(&self, knobs: &mut KnobRegistry) {
        knobs.register(
            KnobDefinition::enumeration("diplomatic_stance", &STANCES, "neutral")
                .required()
                .category("diplomacy")
                .describe("Overall posture toward other civilizations"),
        );
        knobs.register(
            KnobDefinition::number("trade_openness", 1.0)
                .range(0.0, 2.0)
                .category("economy"),
        );
        knobs.register(
            KnobDefinition::number("conflict_escalation_tolerance", 0.3)
                .range(0.0, 1.0)
                .category("military")
                .describe("Tension headroom before a crisis is declared"),
        );
        knobs.register(
            KnobDefinition::number("alliance_reliability", 1.0)
                .range(0.1, 2.0)
                .category("diplomacy"),
        );
        knobs.register(
            KnobDefinition::number("peacekeeping_commitment", 1.0)
                .range(0.0, 2.0)
                .category("diplomacy"),
        );
    }

    fn initialize_templates(&self, templates: &mut TemplateRegistry) {
        templates.register(
            AptTemplate::new(
                STRATEGY_TEMPLATE,
                "Diplomatic Strategy Analysis",
                "inter-civilization",
                "Recommend a diplomatic response.\n\
                 Current stance: {stance}\nTension (0-1): {tensionLevel}\nTrust (0-1): {trustLevel}\n\
                 Triggering events: {triggeringEvents}\n\n\
                 Respond with a JSON object: recommendedStance (one of isolationist, neutral, \
                 cooperative, expansionist), tensionAdjustment (-0.2 to 0.2), actions (array of \
                 strings), confidence (0 to 1).",
            )
            .describe("Stance recommendation after diplomatic events")
            .variables(&["stance", "tensionLevel", "triggeringEvents"], &["trustLevel"])
            .limits(12_000, 1)
            .cost(2_500, 60 * 1024 * 1024, Complexity::High),
        );

        templates.register(
            AptTemplate::new(
                TRADE_TEMPLATE,
                "Trade Opportunity Analysis",
                "inter-civilization",
                "Trade openness: {tradeOpenness}\nActive agreements: {activeAgreements}\n\
                 Trade volume index: {tradeVolume}\n\n\
                 Respond with a JSON object: opportunities (array of strings), \
                 expectedVolumeChange (number), confidence (0 to 1).",
            )
            .describe("New trade opportunities following an agreement")
            .variables(&["tradeOpenness", "activeAgreements"], &["tradeVolume"])
            .cost(1_200, 30 * 1024 * 1024, Complexity::Low),
        );
    }

    async fn execute_system(&mut self, scope: &mut DomainScope<'_>) -> Result<DomainOutput> {
        let stance: String = scope.knob("diplomatic_stance")?;
        let openness: f64 = scope.knob_or("trade_openness", 1.0);
        let tolerance: f64 = scope.knob_or("conflict_escalation_tolerance", 0.3);
        let reliability: f64 = scope.knob_or("alliance_reliability", 1.0);
        let peacekeeping: f64 = scope.knob_or("peacekeeping_commitment", 1.0);

        let context = scope.context();
        let triggering: Vec<&GameEvent> = context
            .active_events
            .iter()
            .filter(|e| self.is_relevant_event(e, context))
            .collect();
        debug!("Diplomacy handling {} event(s) under '{}' stance", triggering.len(), stance);

        let mut scheduled = Vec::new();
        let mut peace_signed = false;
        let mut new_trade = false;

        for event in &triggering {
            match event.event_type.as_str() {
                "war_declaration" => {
                    self.tension += 0.3 * stance_factor(&stance);
                    self.trust -= 0.2;
                    if peacekeeping >= 0.5 {
                        scheduled.push(ScheduledAction {
                            action_type: "ceasefire_negotiation".to_string(),
                            target_system: Some(SYSTEM_ID.to_string()),
                            delay_ticks: 3,
                            payload: json!({ "trigger": event.id }),
                        });
                    }
                }
                "peace_treaty" => {
                    self.tension -= 0.25 * peacekeeping.max(0.1);
                    self.trust += 0.1 * reliability;
                    self.record_agreement(format!("peace:{}", event.source));
                    peace_signed = true;
                }
                "trade_agreement" => {
                    self.trade_volume += 0.1 * openness;
                    self.trust += 0.05;
                    self.record_agreement(format!("trade:{}", event.source));
                    new_trade = true;
                }
                "social_unrest" => {
                    let severity = number(&event.data, "severity").unwrap_or(0.5);
                    self.tension += 0.1 * severity * stance_factor(&stance);
                }
                _ => {}
            }
        }
        self.tension = self.tension.clamp(0.0, 1.0);
        self.trust = self.trust.clamp(0.0, 1.0);

        let event_types: Vec<&str> = triggering.iter().map(|e| e.event_type.as_str()).collect();
        let strategy_vars = payload(json!({
            "stance": stance,
            "tensionLevel": self.tension,
            "trustLevel": self.trust,
            "triggeringEvents": event_types,
        }));
        let strategy = match scope
            .analyze(STRATEGY_TEMPLATE, strategy_vars, Priority::High)
            .await
        {
            Ok(value) => value,
            Err(e) => {
                warn!("Diplomatic strategy analysis unavailable, using fallback: {}", e);
                scope.record_fallback();
                fallback_strategy(&stance, self.tension)
            }
        };

        let adjustment = number(&strategy, "tensionAdjustment")
            .unwrap_or(0.0)
            .clamp(-0.2, 0.2);
        self.tension = (self.tension + adjustment).clamp(0.0, 1.0);

        if new_trade {
            scope.queue_analysis(
                TRADE_TEMPLATE,
                payload(json!({
                    "tradeOpenness": openness,
                    "activeAgreements": self.agreements,
                    "tradeVolume": self.trade_volume,
                })),
                Priority::Low,
                json!({ "opportunities": [], "expectedVolumeChange": 0.0, "confidence": 0.3 }),
            )?;
        }

        let at = event_time(scope);
        let mut events = Vec::new();
        if self.tension > 1.0 - tolerance {
            events.push(
                GameEvent::new("diplomatic_crisis", SYSTEM_ID, at)
                    .with_priority(Priority::High)
                    .with_data(json!({ "tension": self.tension, "stance": stance })),
            );
        }
        if peace_signed && self.trust >= 0.6 {
            events.push(
                GameEvent::new("treaty_signed", SYSTEM_ID, at)
                    .with_data(json!({ "trust": self.trust, "agreements": self.agreements.len() })),
            );
        }

        Ok(DomainOutput {
            game_state_updates: payload(json!({
                "diplomaticRelations": {
                    "stance": stance,
                    "tensionLevel": self.tension,
                    "trustLevel": self.trust,
                    "tradeVolume": self.trade_volume,
                    "activeAgreements": self.agreements,
                },
            })),
            system_outputs: payload(json!({
                "strategy": strategy,
                "processedEvents": triggering.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
            })),
            events_generated: events,
            scheduled_actions: scheduled,
        })
    }

    fn is_relevant_event(&self, event: &GameEvent, _context: &ExecutionContext) -> bool {
        RELEVANT_EVENTS.contains(&event.event_type.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::knobs::{KnobSettings, KnobValue};
    use crate::system::{RuntimeOptions, SystemRuntime};
    use crate::systems::testing::{context, StaticExecutor};
    use chrono::Utc;
    use std::sync::Arc;

    fn runtime() -> SystemRuntime {
        SystemRuntime::new(DiplomacySystem::new(), RuntimeOptions::default())
    }

    fn event(kind: &str) -> GameEvent {
        GameEvent::new(kind, "civ-2", Utc::now())
    }

    #[test]
    fn test_stance_knob_is_enumeration() {
        let rt = runtime();
        let stance = rt
            .knob_definitions()
            .into_iter()
            .find(|d| d.name == "diplomatic_stance")
            .unwrap();
        assert!(stance.required);
        assert_eq!(rt.current_knobs()["diplomatic_stance"], KnobValue::from("neutral"));
    }

    #[test]
    fn test_only_runs_on_relevant_events() {
        let rt = runtime();
        assert!(!rt.should_execute(&context(1)));
        assert!(!rt.should_execute(&context(1).with_events(vec![event("harvest")])));
        assert!(rt.should_execute(&context(1).with_events(vec![event("peace_treaty")])));
    }

    #[tokio::test]
    async fn test_wars_escalate_into_crisis() {
        let mut rt = runtime();
        let ctx = context(1).with_events(vec![event("war_declaration"), event("war_declaration")]);

        let result = rt.execute(&ctx).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.scheduled_actions.len(), 2);
        assert_eq!(result.scheduled_actions[0].delay_ticks, 3);
        assert_eq!(result.metrics.fallbacks_used, 1);

        let tension = result.game_state_updates["diplomaticRelations"]["tensionLevel"]
            .as_f64()
            .unwrap();
        assert!((tension - 0.8).abs() < 1e-9);
        assert_eq!(result.events_generated[0].event_type, "diplomatic_crisis");
        assert_eq!(result.system_outputs["strategy"]["recommendedStance"], "isolationist");
    }

    #[tokio::test]
    async fn test_agreement_log_is_bounded() {
        let mut rt = runtime();
        let events = (0..MAX_AGREEMENTS + 4)
            .map(|i| GameEvent::new("peace_treaty", &format!("civ-{}", i), Utc::now()))
            .collect();

        let result = rt.execute(&context(1).with_events(events)).await;
        assert!(result.success);
        let agreements = result.game_state_updates["diplomaticRelations"]["activeAgreements"]
            .as_array()
            .unwrap();
        assert_eq!(agreements.len(), MAX_AGREEMENTS);
        assert_eq!(agreements[0], json!("peace:civ-4"));
        assert_eq!(
            agreements[MAX_AGREEMENTS - 1],
            json!(format!("peace:civ-{}", MAX_AGREEMENTS + 3))
        );
    }

    #[tokio::test]
    async fn test_isolationist_stance_dampens_escalation() {
        let mut rt = runtime();
        let mut knobs = KnobSettings::new();
        knobs.insert("diplomatic_stance".to_string(), KnobValue::from("isolationist"));
        let ctx = context(1)
            .with_knobs(knobs)
            .with_events(vec![event("war_declaration"), event("war_declaration")]);

        let result = rt.execute(&ctx).await;
        assert!(result.success);
        assert!(result.events_generated.is_empty());
    }

    #[tokio::test]
    async fn test_trade_agreement_queues_analysis() {
        let executor = StaticExecutor::new(&[
            (STRATEGY_TEMPLATE, json!({ "recommendedStance": "cooperative", "tensionAdjustment": -0.5 })),
            (TRADE_TEMPLATE, json!({ "opportunities": ["ore"], "confidence": 0.8 })),
        ]);
        let mut rt = runtime().with_executor(Arc::new(executor));
        let ctx = context(1).with_events(vec![event("trade_agreement")]);

        let result = rt.execute(&ctx).await;
        assert!(result.success);
        assert_eq!(result.metrics.analyses_requested, 2);
        assert_eq!(
            result.system_outputs["analysis"][TRADE_TEMPLATE]["opportunities"],
            json!(["ore"])
        );
        // adjustment is clamped to -0.2
        let tension = result.game_state_updates["diplomaticRelations"]["tensionLevel"]
            .as_f64()
            .unwrap();
        assert!(tension.abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_peace_builds_trust_across_ticks() {
        let mut rt = runtime();
        let mut signed = false;
        for tick in 1..=2 {
            let result = rt
                .execute(&context(tick).with_events(vec![event("peace_treaty")]))
                .await;
            signed |= result
                .events_generated
                .iter()
                .any(|e| e.event_type == "treaty_signed");
        }
        assert!(signed);
    }

    #[tokio::test]
    async fn test_invalid_stance_rejected() {
        let mut rt = runtime();
        let mut knobs = KnobSettings::new();
        knobs.insert("diplomatic_stance".to_string(), KnobValue::from("warlike"));

        let result = rt.execute(&context(1).with_knobs(knobs)).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Configuration));
        assert!(result.error.unwrap().contains("warlike"));
    }
}
