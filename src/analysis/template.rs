//! Analysis templates and their registry.
//!
//! A template is pure metadata: prompt text, variable contract, model
//! preferences and the timeout/retry/cache settings an executor should honor.
//! Nothing here talks to a model.

use crate::error::{AnalysisError, TemplateNotFound};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Expected shape of the model's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Text,
    Markdown,
}

/// Rough cost class of an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Declarative description of one AI-backed analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AptTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    /// Prompt with `{variable}` placeholders.
    pub prompt_template: String,
    pub required_variables: Vec<String>,
    #[serde(default)]
    pub optional_variables: Vec<String>,
    pub preferred_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub output_format: OutputFormat,
    pub timeout_ms: u64,
    pub retry_attempts: u32,
    pub cacheable: bool,
    pub cache_ttl_ms: u64,
    pub estimated_execution_ms: u64,
    pub memory_bytes: u64,
    pub complexity: Complexity,
}

impl AptTemplate {
    /// JSON-output template with a 10s timeout, two retries and a 5 minute cache.
    pub fn new(id: &str, name: &str, category: &str, prompt_template: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            category: category.to_string(),
            prompt_template: prompt_template.to_string(),
            required_variables: Vec::new(),
            optional_variables: Vec::new(),
            preferred_model: "llama3.2:latest".to_string(),
            temperature: 0.3,
            max_tokens: 1500,
            output_format: OutputFormat::Json,
            timeout_ms: 10_000,
            retry_attempts: 2,
            cacheable: true,
            cache_ttl_ms: 300_000,
            estimated_execution_ms: 2_000,
            memory_bytes: 50 * 1024 * 1024,
            complexity: Complexity::Medium,
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn variables(mut self, required: &[&str], optional: &[&str]) -> Self {
        self.required_variables = required.iter().map(|s| s.to_string()).collect();
        self.optional_variables = optional.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn model(mut self, model: &str, temperature: f32, max_tokens: u32) -> Self {
        self.preferred_model = model.to_string();
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn limits(mut self, timeout_ms: u64, retry_attempts: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self.retry_attempts = retry_attempts;
        self
    }

    /// Cache replies for `ttl_ms`; zero disables caching.
    pub fn cache(mut self, ttl_ms: u64) -> Self {
        self.cacheable = ttl_ms > 0;
        self.cache_ttl_ms = ttl_ms;
        self
    }

    pub fn cost(mut self, estimated_ms: u64, memory_bytes: u64, complexity: Complexity) -> Self {
        self.estimated_execution_ms = estimated_ms;
        self.memory_bytes = memory_bytes;
        self.complexity = complexity;
        self
    }

    pub fn output(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Required variables absent from `variables` (or null there).
    pub fn missing_variables(&self, variables: &Map<String, Value>) -> Vec<String> {
        self.required_variables
            .iter()
            .filter(|name| variables.get(*name).map_or(true, Value::is_null))
            .cloned()
            .collect()
    }

    /// Substitute `{name}` placeholders. Strings are inserted raw, other values
    /// as compact JSON. Unknown placeholders are left untouched.
    pub fn render(&self, variables: &Map<String, Value>) -> Result<String, AnalysisError> {
        let missing = self.missing_variables(variables);
        if !missing.is_empty() {
            return Err(AnalysisError::MissingVariables {
                template_id: self.id.clone(),
                missing,
            });
        }

        let mut out = String::with_capacity(self.prompt_template.len());
        let mut rest = self.prompt_template.as_str();

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];

            match after.find('}') {
                Some(close) if is_placeholder(&after[..close]) => {
                    let name = &after[..close];
                    match variables.get(name) {
                        Some(Value::String(s)) => out.push_str(s),
                        Some(value) => out.push_str(&value.to_string()),
                        None => {
                            out.push('{');
                            out.push_str(name);
                            out.push('}');
                        }
                    }
                    rest = &after[close + 1..];
                }
                _ => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);

        Ok(out)
    }
}

fn is_placeholder(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Templates registered by one subsystem, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, AptTemplate>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a template; last write wins.
    pub fn register(&mut self, template: AptTemplate) {
        debug!("Registering analysis template '{}'", template.id);
        self.templates.insert(template.id.clone(), template);
    }

    pub fn describe(&self, id: &str) -> Result<&AptTemplate, TemplateNotFound> {
        self.templates
            .get(id)
            .ok_or_else(|| TemplateNotFound(id.to_string()))
    }

    pub fn ids(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AptTemplate> {
        self.templates.values()
    }
}
