//! Reference subsystems driven by the tick harness.

pub mod diplomacy;
pub mod population;

pub use diplomacy::DiplomacySystem;
pub use population::PopulationSystem;

use crate::models::Payload;
use crate::system::{DomainScope, RuntimeOptions, SystemRuntime};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// One runtime per built-in subsystem.
pub fn reference_runtimes(options: RuntimeOptions) -> Vec<SystemRuntime> {
    vec![
        SystemRuntime::new(PopulationSystem::new(), options),
        SystemRuntime::new(DiplomacySystem::new(), options),
    ]
}

/// Unwrap a `json!({...})` literal into a payload.
pub(crate) fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

pub(crate) fn number(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(Value::as_f64)
}

/// Timestamp for generated events: the snapshot time, so ticks replay identically.
pub(crate) fn event_time(scope: &DomainScope<'_>) -> DateTime<Utc> {
    scope
        .game_state()
        .map(|state| state.taken_at)
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::analysis::{AnalysisExecutor, AnalysisOutcome, AnalysisRequest, AptTemplate};
    use crate::error::AnalysisError;
    use crate::models::{CivilizationContext, ExecutionContext, GameStateSnapshot};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::Value;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Arc;

    /// Replies with a fixed output per template id; unknown ids fail.
    pub struct StaticExecutor {
        replies: HashMap<String, Value>,
    }

    impl StaticExecutor {
        pub fn new(replies: &[(&str, Value)]) -> Self {
            Self {
                replies: replies
                    .iter()
                    .map(|(id, v)| (id.to_string(), v.clone()))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl AnalysisExecutor for StaticExecutor {
        async fn execute(
            &self,
            template: &AptTemplate,
            _request: &AnalysisRequest,
        ) -> Result<AnalysisOutcome, AnalysisError> {
            self.replies
                .get(&template.id)
                .cloned()
                .map(AnalysisOutcome::fresh)
                .ok_or_else(|| AnalysisError::Backend(format!("no reply for {}", template.id)))
        }
    }

    pub fn context(tick: u64) -> ExecutionContext {
        let taken_at = Utc.with_ymd_and_hms(2300, 1, 1, 0, 0, 0).unwrap();
        ExecutionContext::new(
            format!("tick-{}", tick),
            Arc::new(GameStateSnapshot {
                tick,
                taken_at,
                data: Value::Null,
            }),
        )
    }

    pub fn civilization(indicators: &[(&str, f64)]) -> Arc<CivilizationContext> {
        Arc::new(CivilizationContext {
            id: "civ-1".to_string(),
            name: "Terran Union".to_string(),
            total_population: 1_000_000,
            indicators: indicators
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
            recent_events: Vec::new(),
        })
    }
}
