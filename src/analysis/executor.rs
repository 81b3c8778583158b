//! Interface to whatever actually runs analysis tasks.
//!
//! The lifecycle only builds [`AnalysisRequest`]s. Timeouts, retries and
//! caching declared on a template are the executor's job.

use crate::analysis::template::AptTemplate;
use crate::error::AnalysisError;
use crate::models::{Priority, TriggerType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request handed to an [`AnalysisExecutor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub template_id: String,
    /// Current knobs, overlaid by the caller's variables, plus `system_id`.
    pub variables: Map<String, Value>,
    pub execution_id: String,
    pub system_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub civilization_id: Option<String>,
    pub trigger: TriggerType,
    pub priority: Priority,
}

/// Reply from an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub output: Value,
    #[serde(default)]
    pub cache_hit: bool,
    /// Attempts beyond the first.
    #[serde(default)]
    pub retries: u32,
}

impl AnalysisOutcome {
    pub fn fresh(output: Value) -> Self {
        Self {
            output,
            cache_hit: false,
            retries: 0,
        }
    }
}

/// Runs analysis requests against a model backend.
#[async_trait]
pub trait AnalysisExecutor: Send + Sync {
    async fn execute(
        &self,
        template: &AptTemplate,
        request: &AnalysisRequest,
    ) -> Result<AnalysisOutcome, AnalysisError>;
}

/// Build the variable map for a request.
pub fn merge_variables(
    knobs: Map<String, Value>,
    supplied: Map<String, Value>,
    system_id: &str,
) -> Map<String, Value> {
    let mut merged = knobs;
    merged.extend(supplied);
    merged.insert("system_id".to_string(), Value::String(system_id.to_string()));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_supplied_variables_override_knobs() {
        let knobs = json!({ "birth_rate": 0.01, "death_rate": 0.008 })
            .as_object()
            .cloned()
            .unwrap();
        let supplied = json!({ "birth_rate": 0.02, "currentPopulation": 5 })
            .as_object()
            .cloned()
            .unwrap();

        let merged = merge_variables(knobs, supplied, "population");
        assert_eq!(merged["birth_rate"], json!(0.02));
        assert_eq!(merged["death_rate"], json!(0.008));
        assert_eq!(merged["currentPopulation"], json!(5));
        assert_eq!(merged["system_id"], json!("population"));
    }
}
