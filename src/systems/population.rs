//! Population dynamics for a single civilization.

use crate::analysis::{AptTemplate, TemplateRegistry};
use crate::knobs::{KnobDefinition, KnobRegistry};
use crate::models::{
    CivilizationContext, ExecutionContext, ExecutionGroup, GameEvent, Priority, SystemDefinition,
};
use crate::system::{DomainOutput, DomainScope, Subsystem};
use crate::systems::{event_time, number, payload};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

pub const SYSTEM_ID: &str = "population";

const GROWTH_TEMPLATE: &str = "population-growth-analysis";
const BEHAVIOR_TEMPLATE: &str = "citizen-behavior-analysis";
const IMMIGRATION_TEMPLATE: &str = "immigration-impact-assessment";

/// Growth impact below which unrest is reported.
const UNREST_THRESHOLD: f64 = -0.3;

const RELEVANT_EVENTS: &[&str] = &[
    "policy_change",
    "economic_crisis",
    "natural_disaster",
    "war_declaration",
    "peace_treaty",
    "technological_breakthrough",
    "cultural_event",
    "migration_wave",
    "epidemic",
    "infrastructure_completion",
];

/// Births, deaths, migration and citizen sentiment.
#[derive(Debug, Default)]
pub struct PopulationSystem;

impl PopulationSystem {
    pub fn new() -> Self {
        Self
    }
}

/// Knob values read once per tick.
#[derive(Debug, Clone, Copy)]
struct Rates {
    growth: f64,
    birth: f64,
    death: f64,
    immigration: f64,
    emigration: f64,
    healthcare: f64,
    education: f64,
    social_programs: f64,
    social_mobility: f64,
    cultural_cohesion: f64,
}

impl Rates {
    fn read(scope: &DomainScope<'_>) -> Result<Self> {
        Ok(Self {
            growth: scope.knob("population_growth_rate")?,
            birth: scope.knob("birth_rate")?,
            death: scope.knob("death_rate")?,
            immigration: scope.knob_or("immigration_rate", 0.002),
            emigration: scope.knob_or("emigration_rate", 0.001),
            healthcare: scope.knob_or("healthcare_quality", 1.0),
            education: scope.knob_or("education_investment", 1.0),
            social_programs: scope.knob_or("social_programs_funding", 1.0),
            social_mobility: scope.knob_or("social_mobility", 0.1),
            cultural_cohesion: scope.knob_or("cultural_cohesion", 0.7),
        })
    }
}

fn average_happiness(civ: &CivilizationContext, rates: &Rates) -> f64 {
    let economic = if civ.total_population == 0 {
        0.0
    } else {
        (civ.indicator("gdp", 0.0) / civ.total_population as f64 / 50_000.0).min(0.2)
    };
    (0.6 + economic + rates.social_programs * 0.1).min(1.0)
}

fn average_stress(civ: &CivilizationContext) -> f64 {
    let unemployment = civ.indicator("unemployment", 0.05) * 2.0;
    let inflation = civ.indicator("inflation", 0.0).abs() * 0.5;
    (0.3 + unemployment + inflation).min(1.0)
}

fn fallback_growth(civ: &CivilizationContext, rates: &Rates) -> Value {
    let economic = civ.indicator("gdp_growth_rate", 0.02).min(0.05);
    let stability = (average_happiness(civ, rates) - average_stress(civ) - 0.3).clamp(-1.0, 1.0);
    json!({
        "growthRate": rates.birth - rates.death + economic,
        "demographicChanges": {
            "ageShift": 0.01,
            "educationImprovement": rates.education * 0.02,
        },
        "socialStabilityImpact": stability,
        "policyRecommendations": ["Maintain current policies"],
        "confidence": 0.5,
    })
}

fn fallback_behavior(civ: &CivilizationContext, rates: &Rates) -> Value {
    json!({
        "behaviorTrends": {
            "satisfaction": average_happiness(civ, rates),
            "engagement": 0.6,
        },
        "policyResponseAnalysis": { "approval": 0.7, "compliance": 0.8 },
        "socialRiskFactors": [],
        "engagementRecommendations": ["Improve communication"],
        "confidence": 0.4,
    })
}

fn fallback_immigration(rates: &Rates) -> Value {
    json!({
        "optimalImmigrationRate": rates.immigration,
        "economicImpact": {
            "positive": ["Labor force growth"],
            "negative": ["Infrastructure strain"],
        },
        "integrationChallenges": ["Language barriers"],
        "infrastructureNeeds": ["Housing", "Schools"],
        "confidence": 0.3,
    })
}

fn population_metrics(civ: &CivilizationContext, rates: &Rates) -> Value {
    let average_income = if civ.total_population == 0 {
        0.0
    } else {
        civ.indicator("gdp", 0.0) / civ.total_population as f64
    };
    json!({
        "totalPopulation": civ.total_population,
        "averageIncome": average_income,
        "unemploymentRate": civ.indicator("unemployment", 0.05),
        "happinessIndex": average_happiness(civ, rates),
        "stressIndex": average_stress(civ),
        "socialMobility": rates.social_mobility,
    })
}

#[async_trait]
impl Subsystem for PopulationSystem {
    fn definition(&self) -> SystemDefinition {
        SystemDefinition::new(SYSTEM_ID, "Population Management System")
            .description("Citizen lifecycle, demographics and population dynamics")
            .tier(1, ExecutionGroup::Civilization)
            .priority(Priority::High)
            .budget(2_000, 30_000)
            .knobs(
                &["population_growth_rate", "birth_rate", "death_rate"],
                &[
                    "immigration_rate",
                    "emigration_rate",
                    "education_investment",
                    "healthcare_quality",
                    "social_programs_funding",
                    "social_mobility",
                    "cultural_cohesion",
                ],
            )
    }

    fn initialize_knobs(&self, knobs: &mut KnobRegistry) {
        let demographic = |name: &str, default: f64, min: f64, max: f64, description: &str| {
            KnobDefinition::number(name, default)
                .range(min, max)
                .category("demographics")
                .describe(description)
        };

        knobs.register(
            demographic("population_growth_rate", 0.02, -0.05, 0.1, "Overall growth per period")
                .required(),
        );
        knobs.register(
            demographic("birth_rate", 0.015, 0.005, 0.05, "Births per capita per period").required(),
        );
        knobs.register(
            demographic("death_rate", 0.008, 0.003, 0.02, "Deaths per capita per period").required(),
        );
        knobs.register(demographic("immigration_rate", 0.002, 0.0, 0.01, "Arrivals per capita per period"));
        knobs.register(demographic("emigration_rate", 0.001, 0.0, 0.01, "Departures per capita per period"));

        for (name, default, min, max) in [
            ("education_investment", 1.0, 0.1, 3.0),
            ("healthcare_quality", 1.0, 0.1, 3.0),
            ("social_programs_funding", 1.0, 0.0, 5.0),
        ] {
            knobs.register(
                KnobDefinition::number(name, default)
                    .range(min, max)
                    .category("policy")
                    .describe("Investment multiplier"),
            );
        }

        knobs.register(
            KnobDefinition::number("social_mobility", 0.1)
                .range(0.01, 0.5)
                .category("social")
                .describe("Career advancement opportunities"),
        );
        knobs.register(
            KnobDefinition::number("cultural_cohesion", 0.7)
                .range(0.1, 1.0)
                .category("social")
                .describe("Cultural cohesion and social stability"),
        );
    }

    fn initialize_templates(&self, templates: &mut TemplateRegistry) {
        templates.register(
            AptTemplate::new(
                GROWTH_TEMPLATE,
                "Population Growth Analysis",
                "civilization",
                "Analyze population growth for this civilization.\n\
                 Current population: {currentPopulation}\n\
                 Birth rate: {birthRate}\nDeath rate: {deathRate}\n\
                 Immigration rate: {immigrationRate}\nEmigration rate: {emigrationRate}\n\
                 Economic conditions: {economicConditions}\n\
                 Healthcare quality: {healthcareQuality}\n\
                 Education investment: {educationInvestment}\n\
                 Social programs: {socialProgramsFunding}\n\
                 Recent events: {recentEvents}\n\n\
                 Respond with a JSON object: growthRate (number), demographicChanges (object), \
                 socialStabilityImpact (-1 to 1), policyRecommendations (array of strings), \
                 confidence (0 to 1).",
            )
            .describe("Demographic trends and expected population change")
            .variables(
                &[
                    "currentPopulation",
                    "birthRate",
                    "deathRate",
                    "economicConditions",
                    "healthcareQuality",
                    "educationInvestment",
                    "socialProgramsFunding",
                ],
                &["immigrationRate", "emigrationRate", "recentEvents"],
            ),
        );

        templates.register(
            AptTemplate::new(
                BEHAVIOR_TEMPLATE,
                "Citizen Behavior Analysis",
                "civilization",
                "Assess how citizens respond to current conditions.\n\
                 Average happiness: {averageHappiness}\nAverage stress: {averageStress}\n\
                 Employment rate: {employmentRate}\nSocial mobility: {socialMobility}\n\
                 Social conditions: {socialConditions}\n\n\
                 Respond with a JSON object: behaviorTrends (object), policyResponseAnalysis \
                 (object), socialRiskFactors (array), engagementRecommendations (array), \
                 confidence (0 to 1).",
            )
            .describe("Citizen sentiment and response to policy")
            .variables(
                &["averageHappiness", "averageStress", "employmentRate"],
                &["socialMobility", "socialConditions"],
            )
            .model("llama3.2:latest", 0.4, 1200)
            .limits(8_000, 2)
            .cache(180_000)
            .cost(1_500, 40 * 1024 * 1024, crate::analysis::Complexity::Medium),
        );

        templates.register(
            AptTemplate::new(
                IMMIGRATION_TEMPLATE,
                "Immigration Impact Assessment",
                "civilization",
                "Assess immigration for this civilization.\n\
                 Immigration rate: {immigrationRate}\nEmigration rate: {emigrationRate}\n\
                 Population capacity: {populationCapacity}\n\
                 Economic opportunities: {economicOpportunities}\n\
                 Cultural factors: {culturalFactors}\n\n\
                 Respond with a JSON object: optimalImmigrationRate (number), economicImpact \
                 (object), integrationChallenges (array), infrastructureNeeds (array), \
                 confidence (0 to 1).",
            )
            .describe("Optimal immigration rate and integration needs")
            .variables(
                &["immigrationRate", "populationCapacity", "economicOpportunities"],
                &["emigrationRate", "culturalFactors"],
            )
            .model("llama3.2:latest", 0.35, 1300)
            .limits(9_000, 2)
            .cache(600_000)
            .cost(1_800, 45 * 1024 * 1024, crate::analysis::Complexity::Medium),
        );
    }

    async fn execute_system(&mut self, scope: &mut DomainScope<'_>) -> Result<DomainOutput> {
        let civ = scope
            .civilization()
            .context("population system requires a civilization context")?;
        let rates = Rates::read(scope)?;
        debug!("Population tick for '{}' ({} citizens)", civ.id, civ.total_population);

        let recent_events: Vec<&str> = civ
            .recent_events
            .iter()
            .rev()
            .take(5)
            .map(|e| e.event_type.as_str())
            .collect();

        let growth_vars = payload(json!({
            "currentPopulation": civ.total_population,
            "birthRate": rates.birth,
            "deathRate": rates.death,
            "immigrationRate": rates.immigration,
            "emigrationRate": rates.emigration,
            "economicConditions": {
                "gdp": civ.indicator("gdp", 0.0),
                "unemployment": civ.indicator("unemployment", 0.0),
                "inflation": civ.indicator("inflation", 0.0),
            },
            "healthcareQuality": rates.healthcare,
            "educationInvestment": rates.education,
            "socialProgramsFunding": rates.social_programs,
            "recentEvents": recent_events,
        }));
        let growth = match scope.analyze(GROWTH_TEMPLATE, growth_vars, Priority::High).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Population growth analysis unavailable, using fallback: {}", e);
                scope.record_fallback();
                fallback_growth(civ, &rates)
            }
        };

        let immigration_vars = payload(json!({
            "immigrationRate": rates.immigration,
            "emigrationRate": rates.emigration,
            "populationCapacity": civ.total_population as f64 * 1.5,
            "economicOpportunities": {
                "jobGrowth": civ.indicator("gdp_growth_rate", 0.02),
                "wageGrowth": civ.indicator("gdp_growth_rate", 0.02) * 0.8,
            },
            "culturalFactors": {
                "cohesion": rates.cultural_cohesion,
                "diversity": civ.indicator("cultural_index", 50.0),
            },
        }));
        let immigration = match scope
            .analyze(IMMIGRATION_TEMPLATE, immigration_vars, Priority::Medium)
            .await
        {
            Ok(value) => value,
            Err(e) => {
                warn!("Immigration assessment unavailable, using fallback: {}", e);
                scope.record_fallback();
                fallback_immigration(&rates)
            }
        };

        let behavior_vars = payload(json!({
            "averageHappiness": average_happiness(civ, &rates),
            "averageStress": average_stress(civ),
            "employmentRate": 1.0 - civ.indicator("unemployment", 0.05),
            "socialMobility": rates.social_mobility,
            "socialConditions": {
                "culturalCohesion": rates.cultural_cohesion,
                "socialPrograms": rates.social_programs,
            },
        }));
        scope.queue_analysis(
            BEHAVIOR_TEMPLATE,
            behavior_vars,
            Priority::Medium,
            fallback_behavior(civ, &rates),
        )?;

        let growth_rate = number(&growth, "growthRate").unwrap_or(rates.growth);
        let projected = (civ.total_population as f64 * (1.0 + growth_rate)).max(0.0).round();
        let metrics = population_metrics(civ, &rates);

        let at = event_time(scope);
        let mut events = Vec::new();

        if let Some(impact) = number(&growth, "socialStabilityImpact") {
            if impact < UNREST_THRESHOLD {
                events.push(
                    GameEvent::new("social_unrest", SYSTEM_ID, at)
                        .with_priority(Priority::High)
                        .with_data(json!({
                            "civilization": civ.id,
                            "severity": impact.abs(),
                            "causes": growth.get("policyRecommendations").cloned().unwrap_or(Value::Null),
                        })),
                );
            }
        }

        if let Some(optimal) = number(&immigration, "optimalImmigrationRate") {
            if optimal > rates.immigration * 2.0 {
                events.push(
                    GameEvent::new("immigration_opportunity", SYSTEM_ID, at).with_data(json!({
                        "civilization": civ.id,
                        "recommendedRate": optimal,
                        "currentRate": rates.immigration,
                        "benefits": immigration.get("economicImpact").cloned().unwrap_or(Value::Null),
                    })),
                );
            }
        }

        let mut output = DomainOutput {
            events_generated: events,
            ..Default::default()
        };
        output.game_state_updates = payload(json!({
            "populationMetrics": metrics,
            "projectedPopulation": projected,
            "demographicChanges": {
                "growthRate": growth_rate,
                "birthRate": rates.birth,
                "deathRate": rates.death,
                "immigrationRate": rates.immigration,
                "emigrationRate": rates.emigration,
            },
        }));
        output.system_outputs = payload(json!({
            "analyticsReport": {
                "civilization": civ.id,
                "populationGrowth": growth,
                "immigration": immigration,
            },
        }));

        Ok(output)
    }

    fn is_relevant_event(&self, event: &GameEvent, _context: &ExecutionContext) -> bool {
        RELEVANT_EVENTS.contains(&event.event_type.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::knobs::KnobValue;
    use crate::system::{RuntimeOptions, SystemRuntime};
    use crate::systems::testing::{civilization, context, StaticExecutor};
    use std::sync::Arc;

    fn runtime() -> SystemRuntime {
        SystemRuntime::new(PopulationSystem::new(), RuntimeOptions::default())
    }

    #[tokio::test]
    async fn test_offline_tick_uses_fallbacks() {
        let mut rt = runtime();
        let ctx = context(1).with_civilization(civilization(&[]));

        let result = rt.execute(&ctx).await;
        assert!(result.success, "{:?}", result.error);
        // growth + immigration inline, behavior queued
        assert_eq!(result.metrics.fallbacks_used, 3);
        assert_eq!(result.metrics.analyses_failed, 3);

        let growth = result.game_state_updates["demographicChanges"]["growthRate"]
            .as_f64()
            .unwrap();
        assert!((growth - (0.015 - 0.008 + 0.02)).abs() < 1e-9);
        assert_eq!(result.game_state_updates["projectedPopulation"], json!(1_027_000.0));
        assert_eq!(
            result.system_outputs["analysis"][BEHAVIOR_TEMPLATE]["confidence"],
            json!(0.4)
        );
        assert!(result.events_generated.is_empty());
    }

    #[tokio::test]
    async fn test_high_stress_raises_unrest() {
        let mut rt = runtime();
        let civ = civilization(&[("unemployment", 0.3), ("inflation", 0.2)]);

        let result = rt.execute(&context(1).with_civilization(civ)).await;
        assert!(result.success);
        let unrest = result
            .events_generated
            .iter()
            .find(|e| e.event_type == "social_unrest")
            .expect("unrest event");
        assert_eq!(unrest.priority, Priority::High);
        assert_eq!(unrest.source, SYSTEM_ID);
    }

    #[tokio::test]
    async fn test_analysis_output_drives_events() {
        let executor = StaticExecutor::new(&[
            (
                GROWTH_TEMPLATE,
                json!({ "growthRate": 0.05, "socialStabilityImpact": -0.6 }),
            ),
            (IMMIGRATION_TEMPLATE, json!({ "optimalImmigrationRate": 0.009 })),
            (BEHAVIOR_TEMPLATE, json!({ "confidence": 0.9 })),
        ]);
        let mut rt = runtime().with_executor(Arc::new(executor));

        let result = rt.execute(&context(1).with_civilization(civilization(&[]))).await;
        assert!(result.success);
        assert_eq!(result.metrics.fallbacks_used, 0);
        assert_eq!(result.metrics.analyses_requested, 3);
        assert_eq!(result.game_state_updates["projectedPopulation"], json!(1_050_000.0));

        let kinds: Vec<&str> = result
            .events_generated
            .iter()
            .map(|e| e.event_type.as_str())
            .collect();
        assert_eq!(kinds, vec!["social_unrest", "immigration_opportunity"]);
        assert_eq!(result.system_outputs["analysis"][BEHAVIOR_TEMPLATE]["confidence"], json!(0.9));
    }

    #[tokio::test]
    async fn test_requires_civilization() {
        let mut rt = runtime();
        let result = rt.execute(&context(1)).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::ContextValidation));
    }

    #[tokio::test]
    async fn test_knob_bounds() {
        let mut rt = runtime();
        let mut settings = crate::knobs::KnobSettings::new();
        settings.insert("birth_rate".to_string(), KnobValue::Number(0.2));
        settings.insert("death_rate".to_string(), KnobValue::Number(0.0));

        let err = rt.update_knob_settings(&settings).unwrap_err();
        assert_eq!(err.violations().len(), 2);
        assert_eq!(rt.knob_definitions().len(), 10);
    }

    #[test]
    fn test_relevant_events() {
        let system = PopulationSystem::new();
        let ctx = context(1);
        let event = |kind: &str| GameEvent::new(kind, "test", chrono::Utc::now());

        assert!(system.is_relevant_event(&event("epidemic"), &ctx));
        assert!(!system.is_relevant_event(&event("social_unrest"), &ctx));
    }
}
