//! Knob registry and validator.
//!
//! Holds the knob definitions of one subsystem instance together with the
//! current settings. Settings only change through [`KnobRegistry::update`],
//! which validates the whole candidate set before applying any of it.

use crate::error::{ConfigurationError, KnobViolation};
use crate::knobs::definition::{KnobDefinition, KnobKind, KnobValue};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Current knob values, keyed by knob name.
pub type KnobSettings = BTreeMap<String, KnobValue>;

const CHANGE_CHANNEL_CAPACITY: usize = 32;

/// Outcome of validating a candidate settings map.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    #[serde(skip)]
    pub violations: Vec<KnobViolation>,
}

impl ValidationReport {
    fn from_violations(violations: Vec<KnobViolation>) -> Self {
        Self {
            valid: violations.is_empty(),
            errors: violations.iter().map(|v| v.to_string()).collect(),
            violations,
        }
    }
}

/// Notification sent to observers after a successful update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnobChange {
    /// Values that were applied.
    pub applied: KnobSettings,
    /// Values held before the update, `None` where the knob was unset.
    pub previous: BTreeMap<String, Option<KnobValue>>,
}

/// Typed read access to a knob value.
pub trait FromKnob: Sized {
    const EXPECTED: &'static str;

    fn from_knob(value: &KnobValue) -> Option<Self>;
}

impl FromKnob for f64 {
    const EXPECTED: &'static str = "number";

    fn from_knob(value: &KnobValue) -> Option<Self> {
        value.as_f64()
    }
}

impl FromKnob for i64 {
    const EXPECTED: &'static str = "integer";

    fn from_knob(value: &KnobValue) -> Option<Self> {
        value
            .as_f64()
            .filter(|n| n.fract() == 0.0)
            .map(|n| n as i64)
    }
}

impl FromKnob for u64 {
    const EXPECTED: &'static str = "unsigned integer";

    fn from_knob(value: &KnobValue) -> Option<Self> {
        value
            .as_f64()
            .filter(|n| n.fract() == 0.0 && *n >= 0.0)
            .map(|n| n as u64)
    }
}

impl FromKnob for bool {
    const EXPECTED: &'static str = "boolean";

    fn from_knob(value: &KnobValue) -> Option<Self> {
        value.as_bool()
    }
}

impl FromKnob for String {
    const EXPECTED: &'static str = "string";

    fn from_knob(value: &KnobValue) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl FromKnob for KnobValue {
    const EXPECTED: &'static str = "any";

    fn from_knob(value: &KnobValue) -> Option<Self> {
        Some(value.clone())
    }
}

/// Per-instance knob definitions plus current settings.
#[derive(Debug)]
pub struct KnobRegistry {
    definitions: BTreeMap<String, KnobDefinition>,
    settings: KnobSettings,
    changes: broadcast::Sender<KnobChange>,
}

impl KnobRegistry {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            definitions: BTreeMap::new(),
            settings: KnobSettings::new(),
            changes,
        }
    }

    /// Register a definition. Re-registering a name replaces the definition
    /// but keeps any value already held for it.
    pub fn register(&mut self, definition: KnobDefinition) {
        if !self.settings.contains_key(&definition.name) {
            if let Some(default) = &definition.default_value {
                self.settings
                    .insert(definition.name.clone(), default.clone());
            }
        }

        if self.definitions.contains_key(&definition.name) {
            debug!("Replacing knob definition '{}'", definition.name);
        }
        self.definitions.insert(definition.name.clone(), definition);
    }

    pub fn definition(&self, name: &str) -> Option<&KnobDefinition> {
        self.definitions.get(name)
    }

    /// All definitions, ordered by name.
    pub fn definitions(&self) -> Vec<KnobDefinition> {
        self.definitions.values().cloned().collect()
    }

    /// Names of definitions flagged `required`.
    pub fn required_names(&self) -> Vec<&str> {
        self.definitions
            .values()
            .filter(|d| d.required)
            .map(|d| d.name.as_str())
            .collect()
    }

    pub fn current(&self) -> &KnobSettings {
        &self.settings
    }

    /// True if `name` has a value in `candidate` or in the held settings.
    pub fn is_resolvable(&self, name: &str, candidate: &KnobSettings) -> bool {
        candidate.contains_key(name) || self.settings.contains_key(name)
    }

    /// Read a knob as `T`.
    pub fn get<T: FromKnob>(&self, name: &str) -> Result<T, ConfigurationError> {
        let definition = self
            .definitions
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownKnob(name.to_string()))?;

        let value = match self.settings.get(name) {
            Some(value) => value,
            None if definition.required => {
                return Err(ConfigurationError::MissingRequired(name.to_string()))
            }
            None => definition
                .default_value
                .as_ref()
                .ok_or_else(|| ConfigurationError::Unset(name.to_string()))?,
        };

        T::from_knob(value).ok_or_else(|| ConfigurationError::TypeMismatch {
            name: name.to_string(),
            expected: T::EXPECTED,
        })
    }

    /// Check a candidate settings map, collecting every violation.
    pub fn validate(&self, candidate: &KnobSettings) -> ValidationReport {
        let mut violations = Vec::new();

        for (name, value) in candidate {
            match self.definitions.get(name) {
                Some(definition) => check_value(definition, value, &mut violations),
                None => violations.push(KnobViolation::UnknownKnob { name: name.clone() }),
            }
        }

        for definition in self.definitions.values().filter(|d| d.required) {
            if !self.is_resolvable(&definition.name, candidate) {
                violations.push(KnobViolation::MissingRequired {
                    name: definition.name.clone(),
                });
            }
        }

        ValidationReport::from_violations(violations)
    }

    /// Re-validate the held settings against the current definitions.
    ///
    /// Re-registration keeps customized values, so held settings can fall
    /// outside a newly narrowed definition.
    pub fn validate_current(&self) -> ValidationReport {
        self.validate(&self.settings)
    }

    /// Validate and apply `new_settings`, notifying observers.
    pub fn update(&mut self, new_settings: &KnobSettings) -> Result<(), ConfigurationError> {
        let report = self.validate(new_settings);
        if !report.valid {
            warn!(
                "Rejected knob update with {} violation(s): {}",
                report.violations.len(),
                report.errors.join("; ")
            );
            return Err(ConfigurationError::Invalid {
                violations: report.violations,
            });
        }

        if new_settings.is_empty() {
            return Ok(());
        }

        let mut previous = BTreeMap::new();
        for (name, value) in new_settings {
            let old = self.settings.insert(name.clone(), value.clone());
            previous.insert(name.clone(), old);
        }

        debug!("Applied {} knob update(s)", new_settings.len());

        // No subscribers is fine.
        let _ = self.changes.send(KnobChange {
            applied: new_settings.clone(),
            previous,
        });

        Ok(())
    }

    /// Subscribe to configuration-changed notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<KnobChange> {
        self.changes.subscribe()
    }

    /// Current settings as a JSON object, for analysis variables and reports.
    pub fn to_json_map(&self) -> serde_json::Map<String, serde_json::Value> {
        self.settings
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }
}

impl Default for KnobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn check_value(definition: &KnobDefinition, value: &KnobValue, out: &mut Vec<KnobViolation>) {
    let name = &definition.name;

    match (&definition.kind, value) {
        (KnobKind::Number { min, max }, KnobValue::Number(n)) => {
            if !n.is_finite() {
                out.push(KnobViolation::TypeMismatch {
                    name: name.clone(),
                    expected: "finite number".to_string(),
                    actual: n.to_string(),
                });
                return;
            }
            if let Some(min) = min {
                if n < min {
                    out.push(KnobViolation::BelowMinimum {
                        name: name.clone(),
                        value: *n,
                        min: *min,
                    });
                }
            }
            if let Some(max) = max {
                if n > max {
                    out.push(KnobViolation::AboveMaximum {
                        name: name.clone(),
                        value: *n,
                        max: *max,
                    });
                }
            }
        }
        (KnobKind::Boolean, KnobValue::Boolean(_)) => {}
        (KnobKind::Text, KnobValue::Text(_)) => {}
        (KnobKind::Enumeration { variants }, KnobValue::Text(s)) => {
            if !variants.iter().any(|v| v == s) {
                out.push(KnobViolation::InvalidVariant {
                    name: name.clone(),
                    value: s.clone(),
                    allowed: variants.clone(),
                });
            }
        }
        (kind, value) => out.push(KnobViolation::TypeMismatch {
            name: name.clone(),
            expected: kind.type_name().to_string(),
            actual: value.type_name().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn settings(pairs: &[(&str, KnobValue)]) -> KnobSettings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn demo_registry() -> KnobRegistry {
        let mut registry = KnobRegistry::new();
        registry.register(
            KnobDefinition::number("birth_rate", 0.015)
                .range(0.005, 0.05)
                .required(),
        );
        registry.register(KnobDefinition::number("death_rate", 0.008).range(0.003, 0.02));
        registry.register(KnobDefinition::boolean("auto_balance", true));
        registry.register(KnobDefinition::enumeration(
            "stance",
            &["neutral", "cooperative"],
            "neutral",
        ));
        registry
    }

    #[test]
    fn test_defaults_seeded_on_register() {
        let registry = demo_registry();
        for definition in registry.definitions() {
            assert_eq!(
                registry.current().get(&definition.name),
                definition.default_value.as_ref()
            );
        }
        assert_eq!(registry.get::<f64>("birth_rate").unwrap(), 0.015);
        assert!(registry.get::<bool>("auto_balance").unwrap());
        assert_eq!(registry.get::<String>("stance").unwrap(), "neutral");
    }

    #[test]
    fn test_reregister_keeps_customized_value() {
        let mut registry = demo_registry();
        assert_ok!(registry.update(&settings(&[("death_rate", 0.01.into())])));

        registry.register(KnobDefinition::number("death_rate", 0.004).range(0.003, 0.02));
        assert_eq!(registry.get::<f64>("death_rate").unwrap(), 0.01);
        assert_eq!(
            registry.definition("death_rate").unwrap().default_value,
            Some(KnobValue::Number(0.004))
        );
    }

    #[test]
    fn test_validate_reports_every_violation() {
        let registry = demo_registry();
        let report = registry.validate(&settings(&[
            ("birth_rate", 0.5.into()),
            ("death_rate", 0.0.into()),
            ("auto_balance", "yes".into()),
            ("stance", "hostile".into()),
            ("gravity", 9.8.into()),
        ]));

        assert!(!report.valid);
        assert_eq!(report.errors.len(), 5);
        assert!(report
            .violations
            .contains(&KnobViolation::UnknownKnob {
                name: "gravity".to_string()
            }));
    }

    #[test]
    fn test_two_out_of_range_numbers_yield_two_errors() {
        let registry = demo_registry();
        let report = registry.validate(&settings(&[
            ("birth_rate", 1.0.into()),
            ("death_rate", 1.0.into()),
        ]));
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn test_missing_required_without_default() {
        let mut registry = KnobRegistry::new();
        registry.register(KnobDefinition::number("x", 0.0).required().without_default());

        let report = registry.validate(&KnobSettings::new());
        assert_eq!(
            report.violations,
            vec![KnobViolation::MissingRequired {
                name: "x".to_string()
            }]
        );
        assert_eq!(
            registry.get::<f64>("x"),
            Err(ConfigurationError::MissingRequired("x".to_string()))
        );

        assert!(registry.validate(&settings(&[("x", 1.0.into())])).valid);
    }

    #[test]
    fn test_update_rejects_whole_batch() {
        let mut registry = demo_registry();
        let err = assert_err!(registry.update(&settings(&[
            ("death_rate", 0.01.into()),
            ("birth_rate", 2.0.into()),
        ])));

        assert_eq!(err.violations().len(), 1);
        assert_eq!(registry.get::<f64>("death_rate").unwrap(), 0.008);
    }

    #[test]
    fn test_get_errors() {
        let registry = demo_registry();
        assert_eq!(
            registry.get::<f64>("unknown"),
            Err(ConfigurationError::UnknownKnob("unknown".to_string()))
        );
        assert!(matches!(
            registry.get::<bool>("birth_rate"),
            Err(ConfigurationError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_current_detects_drift() {
        let mut registry = demo_registry();
        assert_ok!(registry.update(&settings(&[("death_rate", 0.015.into())])));
        assert!(registry.validate_current().valid);

        registry.register(KnobDefinition::number("death_rate", 0.005).range(0.003, 0.01));
        let report = registry.validate_current();
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_update_notifies_subscribers() {
        let mut registry = demo_registry();
        let mut rx = registry.subscribe();

        assert_ok!(registry.update(&settings(&[("stance", "cooperative".into())])));

        let change = rx.recv().await.unwrap();
        assert_eq!(
            change.applied.get("stance"),
            Some(&KnobValue::Text("cooperative".to_string()))
        );
        assert_eq!(
            change.previous.get("stance"),
            Some(&Some(KnobValue::Text("neutral".to_string())))
        );
    }
}
