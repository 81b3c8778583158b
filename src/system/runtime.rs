//! Per-instance execution lifecycle.
//!
//! A [`SystemRuntime`] owns one subsystem together with its knob registry,
//! template registry and execution history. The external scheduler calls
//! [`SystemRuntime::execute`] at most once per tick; nothing in here locks.

use crate::analysis::{AnalysisExecutor, AptTemplate, TemplateRegistry};
use crate::clock::{elapsed_ms, Clock, SystemClock};
use crate::error::{
    AnalysisError, ConfigurationError, ContextValidationError, OrchestrationError,
    TemplateNotFound,
};
use crate::health::{ExecutionHistory, HealthPolicy, HealthStatus, HistoryEntry};
use crate::knobs::{KnobChange, KnobDefinition, KnobRegistry, KnobSettings, ValidationReport};
use crate::models::{ExecutionContext, ExecutionMetrics, ExecutionResult, SystemDefinition};
use crate::schedule::{should_execute, GateState};
use crate::system::{DomainOutput, DomainScope, Subsystem};
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Engine settings shared by every runtime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuntimeOptions {
    pub history_capacity: usize,
    pub health: HealthPolicy,
    /// Interval for periodic systems that declare none.
    pub default_interval_ms: u64,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            history_capacity: 100,
            health: HealthPolicy::default(),
            default_interval_ms: 300_000,
        }
    }
}

pub struct SystemRuntime {
    subsystem: Box<dyn Subsystem>,
    definition: SystemDefinition,
    knobs: KnobRegistry,
    templates: TemplateRegistry,
    history: ExecutionHistory,
    options: RuntimeOptions,
    clock: Arc<dyn Clock>,
    executor: Option<Arc<dyn AnalysisExecutor>>,
}

impl SystemRuntime {
    /// Wrap `subsystem`, running its knob and template initializers.
    pub fn new<S: Subsystem + 'static>(subsystem: S, options: RuntimeOptions) -> Self {
        let definition = subsystem.definition();

        let mut knobs = KnobRegistry::new();
        subsystem.initialize_knobs(&mut knobs);

        let mut templates = TemplateRegistry::new();
        subsystem.initialize_templates(&mut templates);

        info!(
            "Initialized system '{}' (tier {}, {} knobs, {} templates)",
            definition.id,
            definition.tier,
            knobs.definitions().len(),
            templates.len()
        );

        Self {
            subsystem: Box::new(subsystem),
            definition,
            knobs,
            templates,
            history: ExecutionHistory::new(options.history_capacity),
            options,
            clock: Arc::new(SystemClock),
            executor: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn AnalysisExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn system_definition(&self) -> &SystemDefinition {
        &self.definition
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn knob_definitions(&self) -> Vec<KnobDefinition> {
        self.knobs.definitions()
    }

    pub fn current_knobs(&self) -> KnobSettings {
        self.knobs.current().clone()
    }

    /// Validate and apply knob settings outside the tick lifecycle.
    pub fn update_knob_settings(&mut self, settings: &KnobSettings) -> Result<(), ConfigurationError> {
        self.knobs.update(settings)
    }

    pub fn validate_current_knobs(&self) -> ValidationReport {
        self.knobs.validate_current()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KnobChange> {
        self.knobs.subscribe()
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn describe_template(&self, id: &str) -> Result<&AptTemplate, TemplateNotFound> {
        self.templates.describe(id)
    }

    pub fn history(&self) -> &ExecutionHistory {
        &self.history
    }

    pub fn health_status(&self) -> HealthStatus {
        let knobs_valid = self.knobs.validate_current().valid;
        self.options.health.evaluate(&self.history, knobs_valid)
    }

    pub fn should_execute(&self, context: &ExecutionContext) -> bool {
        let state = GateState {
            last_execution: self.history.last().map(|e| e.timestamp),
            now: self.clock.now(),
            default_interval_ms: self.options.default_interval_ms,
        };
        let subsystem = &self.subsystem;
        should_execute(&self.definition, state, context, |event, ctx| {
            subsystem.is_relevant_event(event, ctx)
        })
    }

    /// Run one invocation. Every failure, including a panic in domain logic,
    /// comes back as a failed result.
    pub async fn execute(&mut self, context: &ExecutionContext) -> ExecutionResult {
        let started = self.clock.now();
        let outcome = self.run_lifecycle(context).await;
        let duration_ms = elapsed_ms(started, self.clock.now());

        let timeout_exceeded = duration_ms > self.definition.timeout_ms;
        if timeout_exceeded {
            warn!(
                "System '{}' took {}ms, over its {}ms budget",
                self.definition.id, duration_ms, self.definition.timeout_ms
            );
        }

        match outcome {
            Ok((output, mut metrics)) => {
                metrics.duration_ms = duration_ms;
                metrics.timeout_exceeded = timeout_exceeded;

                self.history.record(HistoryEntry {
                    timestamp: started,
                    success: true,
                    duration_ms,
                    error: None,
                });
                debug!(
                    "System '{}' finished {} in {}ms",
                    self.definition.id, context.execution_id, duration_ms
                );

                ExecutionResult {
                    execution_id: context.execution_id.clone(),
                    system_id: self.definition.id.clone(),
                    success: true,
                    duration_ms,
                    timestamp: started,
                    game_state_updates: output.game_state_updates,
                    system_outputs: output.system_outputs,
                    events_generated: output.events_generated,
                    scheduled_actions: output.scheduled_actions,
                    metrics,
                    error: None,
                    error_kind: None,
                }
            }
            Err(err) => {
                let message = err.to_string();
                error!(
                    "System '{}' failed {} ({}): {}",
                    self.definition.id,
                    context.execution_id,
                    err.kind(),
                    message
                );

                self.history.record(HistoryEntry {
                    timestamp: started,
                    success: false,
                    duration_ms,
                    error: Some(message.clone()),
                });

                ExecutionResult {
                    execution_id: context.execution_id.clone(),
                    system_id: self.definition.id.clone(),
                    success: false,
                    duration_ms,
                    timestamp: started,
                    game_state_updates: Default::default(),
                    system_outputs: Default::default(),
                    events_generated: Vec::new(),
                    scheduled_actions: Vec::new(),
                    metrics: ExecutionMetrics {
                        duration_ms,
                        fallbacks_used: 1,
                        timeout_exceeded,
                        ..Default::default()
                    },
                    error: Some(message),
                    error_kind: Some(err.kind()),
                }
            }
        }
    }

    async fn run_lifecycle(
        &mut self,
        context: &ExecutionContext,
    ) -> Result<(DomainOutput, ExecutionMetrics), OrchestrationError> {
        self.validate_context(context)?;

        self.knobs.update(&context.knob_settings)?;

        let mut scope = DomainScope::new(
            context,
            &self.definition,
            &self.knobs,
            &self.templates,
            self.executor.as_deref(),
        );

        let domain = AssertUnwindSafe(self.subsystem.execute_system(&mut scope))
            .catch_unwind()
            .await;
        let mut output = match domain {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(classify_domain_error(e)),
            Err(panic) => {
                return Err(OrchestrationError::DomainExecution(format!(
                    "panicked: {}",
                    panic_message(panic.as_ref())
                )))
            }
        };

        let analysis = scope.process_queued().await;
        if !analysis.is_empty() {
            match output.system_outputs.get_mut("analysis") {
                Some(Value::Object(existing)) => existing.extend(analysis),
                _ => {
                    output
                        .system_outputs
                        .insert("analysis".to_string(), Value::Object(analysis));
                }
            }
        }

        Ok((output, scope.into_metrics()))
    }

    fn validate_context(&self, context: &ExecutionContext) -> Result<(), ContextValidationError> {
        if context.game_state.is_none() {
            return Err(ContextValidationError::MissingGameState);
        }

        if self.definition.requires_civilization() && context.civilization.is_none() {
            return Err(ContextValidationError::MissingCivilization {
                system_id: self.definition.id.clone(),
            });
        }

        for name in &self.definition.required_knobs {
            if !self.knobs.is_resolvable(name, &context.knob_settings) {
                return Err(ContextValidationError::UnresolvedKnob { name: name.clone() });
            }
        }

        Ok(())
    }
}

fn classify_domain_error(err: anyhow::Error) -> OrchestrationError {
    if let Some(missing) = err.downcast_ref::<TemplateNotFound>() {
        return OrchestrationError::TemplateNotFound(missing.clone());
    }
    if let Some(AnalysisError::TemplateNotFound(missing)) = err.downcast_ref::<AnalysisError>() {
        return OrchestrationError::TemplateNotFound(missing.clone());
    }
    if let Some(config) = err.downcast_ref::<ConfigurationError>() {
        return OrchestrationError::Configuration(config.clone());
    }
    OrchestrationError::DomainExecution(format!("{:#}", err))
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
