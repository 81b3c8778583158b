//! Error taxonomy for the orchestration core.
//!
//! `execute()` never surfaces these as `Err`: every failure on the tick path is
//! folded into a failed `ExecutionResult` tagged with its [`ErrorKind`]. Only
//! direct knob updates return [`ConfigurationError`] to the caller.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A single knob constraint violation found during validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KnobViolation {
    #[error("unknown knob '{name}'")]
    UnknownKnob { name: String },

    #[error("knob '{name}' expects {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("knob '{name}' value {value} is below minimum {min}")]
    BelowMinimum { name: String, value: f64, min: f64 },

    #[error("knob '{name}' value {value} is above maximum {max}")]
    AboveMaximum { name: String, value: f64, max: f64 },

    #[error("knob '{name}' value '{value}' is not one of [{}]", .allowed.join(", "))]
    InvalidVariant {
        name: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("required knob '{name}' has no value")]
    MissingRequired { name: String },
}

/// Invalid knob configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    /// One or more violations found by validation; all of them are listed.
    #[error("invalid knob settings: {}", join_violations(.violations))]
    Invalid { violations: Vec<KnobViolation> },

    #[error("unknown knob '{0}'")]
    UnknownKnob(String),

    #[error("required knob '{0}' has no value")]
    MissingRequired(String),

    #[error("knob '{0}' has no value and no default")]
    Unset(String),

    #[error("knob '{name}' cannot be read as {expected}")]
    TypeMismatch { name: String, expected: &'static str },
}

impl ConfigurationError {
    /// Violations carried by an aggregated validation failure.
    pub fn violations(&self) -> &[KnobViolation] {
        match self {
            ConfigurationError::Invalid { violations } => violations,
            _ => &[],
        }
    }
}

fn join_violations(violations: &[KnobViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// The invocation context cannot be executed by this subsystem.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContextValidationError {
    #[error("execution context has no game state snapshot")]
    MissingGameState,

    #[error("system '{system_id}' is tier 1 and requires a civilization context")]
    MissingCivilization { system_id: String },

    #[error("required knob '{name}' cannot be resolved from context or current settings")]
    UnresolvedKnob { name: String },
}

/// Requested analysis template was never registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("analysis template '{0}' is not registered")]
pub struct TemplateNotFound(pub String);

/// Failure while preparing or running an analysis task.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    TemplateNotFound(#[from] TemplateNotFound),

    #[error("template '{template_id}' is missing required variables: {}", .missing.join(", "))]
    MissingVariables {
        template_id: String,
        missing: Vec<String>,
    },

    #[error("no analysis executor configured")]
    NoExecutor,

    #[error("analysis '{template_id}' timed out after {timeout_ms}ms")]
    Timeout { template_id: String, timeout_ms: u64 },

    #[error("analysis backend error: {0}")]
    Backend(String),

    #[error("analysis '{template_id}' returned unparseable output: {reason}")]
    InvalidOutput { template_id: String, reason: String },
}

/// Stable tag for the failure class recorded on a failed result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    ContextValidation,
    DomainExecution,
    TemplateNotFound,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "ConfigurationError"),
            ErrorKind::ContextValidation => write!(f, "ContextValidationError"),
            ErrorKind::DomainExecution => write!(f, "DomainExecutionError"),
            ErrorKind::TemplateNotFound => write!(f, "TemplateNotFound"),
        }
    }
}

/// Any failure inside one invocation of the execution lifecycle.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    #[error("{0}")]
    ContextValidation(#[from] ContextValidationError),

    #[error("domain execution failed: {0}")]
    DomainExecution(String),

    #[error("{0}")]
    TemplateNotFound(#[from] TemplateNotFound),
}

impl OrchestrationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestrationError::Configuration(_) => ErrorKind::Configuration,
            OrchestrationError::ContextValidation(_) => ErrorKind::ContextValidation,
            OrchestrationError::DomainExecution(_) => ErrorKind::DomainExecution,
            OrchestrationError::TemplateNotFound(_) => ErrorKind::TemplateNotFound,
        }
    }
}

/// Invalid execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("system '{system_id}' depends on unknown system '{dependency}'")]
    UnknownDependency { system_id: String, dependency: String },

    #[error("system '{system_id}' depends on '{dependency}' which runs in a later group")]
    ForwardDependency { system_id: String, dependency: String },

    #[error("dependency cycle among systems: {}", .systems.join(", "))]
    Cycle { systems: Vec<String> },

    #[error("system '{0}' is registered twice")]
    DuplicateSystem(String),
}
