//! Knob definitions and values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type of a knob, with its constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KnobKind {
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    Boolean,
    Text,
    Enumeration { variants: Vec<String> },
}

impl KnobKind {
    /// Short type name used in messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            KnobKind::Number { .. } => "number",
            KnobKind::Boolean => "boolean",
            KnobKind::Text => "string",
            KnobKind::Enumeration { .. } => "enum",
        }
    }
}

/// A concrete knob value.
///
/// Untagged so that `birth_rate = 0.02` in TOML or JSON maps directly.
/// Enumeration knobs hold `Text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KnobValue {
    Boolean(bool),
    Number(f64),
    Text(String),
}

impl KnobValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            KnobValue::Boolean(_) => "boolean",
            KnobValue::Number(_) => "number",
            KnobValue::Text(_) => "string",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            KnobValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            KnobValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            KnobValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Parse a value from a command-line literal (`true`, `0.5`, `neutral`).
    pub fn parse_literal(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(b) = raw.parse::<bool>() {
            return KnobValue::Boolean(b);
        }
        if let Ok(n) = raw.parse::<f64>() {
            return KnobValue::Number(n);
        }
        KnobValue::Text(raw.to_string())
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            KnobValue::Boolean(b) => serde_json::Value::Bool(*b),
            KnobValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            KnobValue::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for KnobValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnobValue::Boolean(b) => write!(f, "{}", b),
            KnobValue::Number(n) => write!(f, "{}", n),
            KnobValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<f64> for KnobValue {
    fn from(n: f64) -> Self {
        KnobValue::Number(n)
    }
}

impl From<bool> for KnobValue {
    fn from(b: bool) -> Self {
        KnobValue::Boolean(b)
    }
}

impl From<&str> for KnobValue {
    fn from(s: &str) -> Self {
        KnobValue::Text(s.to_string())
    }
}

impl From<String> for KnobValue {
    fn from(s: String) -> Self {
        KnobValue::Text(s)
    }
}

/// One tunable parameter of a subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnobDefinition {
    pub name: String,
    pub kind: KnobKind,
    /// Value seeded into the current settings at registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<KnobValue>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
}

impl KnobDefinition {
    fn new(name: &str, kind: KnobKind, default_value: Option<KnobValue>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            default_value,
            required: false,
            category: "general".to_string(),
            description: String::new(),
        }
    }

    /// Unbounded numeric knob.
    pub fn number(name: &str, default: f64) -> Self {
        Self::new(
            name,
            KnobKind::Number {
                min: None,
                max: None,
            },
            Some(KnobValue::Number(default)),
        )
    }

    pub fn boolean(name: &str, default: bool) -> Self {
        Self::new(name, KnobKind::Boolean, Some(KnobValue::Boolean(default)))
    }

    pub fn text(name: &str, default: &str) -> Self {
        Self::new(name, KnobKind::Text, Some(KnobValue::Text(default.to_string())))
    }

    pub fn enumeration(name: &str, variants: &[&str], default: &str) -> Self {
        Self::new(
            name,
            KnobKind::Enumeration {
                variants: variants.iter().map(|v| v.to_string()).collect(),
            },
            Some(KnobValue::Text(default.to_string())),
        )
    }

    /// Set numeric bounds. Ignored for non-numeric knobs.
    pub fn range(mut self, min: f64, max: f64) -> Self {
        if let KnobKind::Number { .. } = self.kind {
            self.kind = KnobKind::Number {
                min: Some(min),
                max: Some(max),
            };
        }
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Drop the default so the value must be supplied by the caller.
    pub fn without_default(mut self) -> Self {
        self.default_value = None;
        self
    }

    pub fn category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_constraints() {
        let def = KnobDefinition::number("birth_rate", 0.015)
            .range(0.005, 0.05)
            .required()
            .category("demographics");

        assert!(def.required);
        assert_eq!(def.category, "demographics");
        assert_eq!(
            def.kind,
            KnobKind::Number {
                min: Some(0.005),
                max: Some(0.05)
            }
        );
        assert_eq!(def.default_value, Some(KnobValue::Number(0.015)));
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(KnobValue::parse_literal("true"), KnobValue::Boolean(true));
        assert_eq!(KnobValue::parse_literal("0.25"), KnobValue::Number(0.25));
        assert_eq!(
            KnobValue::parse_literal(" neutral "),
            KnobValue::Text("neutral".to_string())
        );
    }

    #[test]
    fn test_untagged_value_from_toml() {
        #[derive(Deserialize)]
        struct Doc {
            a: KnobValue,
            b: KnobValue,
            c: KnobValue,
        }

        let doc: Doc = toml::from_str("a = 0.5\nb = true\nc = \"neutral\"").unwrap();
        assert_eq!(doc.a, KnobValue::Number(0.5));
        assert_eq!(doc.b, KnobValue::Boolean(true));
        assert_eq!(doc.c, KnobValue::Text("neutral".to_string()));
    }
}
