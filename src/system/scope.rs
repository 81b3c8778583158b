//! What domain logic sees while it runs.

use crate::analysis::{
    merge_variables, AnalysisExecutor, AnalysisOutcome, AnalysisRequest, AptTemplate,
    TemplateRegistry,
};
use crate::error::{AnalysisError, ConfigurationError, TemplateNotFound};
use crate::knobs::{FromKnob, KnobRegistry, KnobSettings};
use crate::models::{
    CivilizationContext, ExecutionContext, ExecutionMetrics, GameStateSnapshot, Payload, Priority,
    SystemDefinition,
};
use crate::system::runtime::panic_message;
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use tracing::{debug, warn};

/// An analysis deferred to the lifecycle's analysis step.
#[derive(Debug, Clone)]
struct QueuedAnalysis {
    template: AptTemplate,
    request: AnalysisRequest,
    fallback: Value,
}

/// Borrowed view of one invocation handed to [`Subsystem::execute_system`].
///
/// Knob reads go through the instance's registry after the context's settings
/// were applied. Analysis work is counted here and folded into the result's
/// metrics.
///
/// [`Subsystem::execute_system`]: crate::system::Subsystem::execute_system
pub struct DomainScope<'a> {
    context: &'a ExecutionContext,
    definition: &'a SystemDefinition,
    knobs: &'a KnobRegistry,
    templates: &'a TemplateRegistry,
    executor: Option<&'a dyn AnalysisExecutor>,
    queued: Vec<QueuedAnalysis>,
    metrics: ExecutionMetrics,
}

impl<'a> DomainScope<'a> {
    pub(crate) fn new(
        context: &'a ExecutionContext,
        definition: &'a SystemDefinition,
        knobs: &'a KnobRegistry,
        templates: &'a TemplateRegistry,
        executor: Option<&'a dyn AnalysisExecutor>,
    ) -> Self {
        Self {
            context,
            definition,
            knobs,
            templates,
            executor,
            queued: Vec::new(),
            metrics: ExecutionMetrics::default(),
        }
    }

    pub fn context(&self) -> &'a ExecutionContext {
        self.context
    }

    pub fn definition(&self) -> &'a SystemDefinition {
        self.definition
    }

    /// Civilization context; always present for tier 1 systems.
    pub fn civilization(&self) -> Option<&'a CivilizationContext> {
        self.context.civilization.as_deref()
    }

    pub fn game_state(&self) -> Option<&'a GameStateSnapshot> {
        self.context.game_state.as_deref()
    }

    pub fn knob<T: FromKnob>(&self, name: &str) -> Result<T, ConfigurationError> {
        self.knobs.get(name)
    }

    /// Read a knob, falling back to `default` when it has no value.
    ///
    /// Unknown names and type mismatches also fall back, with a warning.
    pub fn knob_or<T: FromKnob>(&self, name: &str, default: T) -> T {
        match self.knobs.get(name) {
            Ok(value) => value,
            Err(e) => {
                if !is_absent(&e) {
                    warn!(
                        "System '{}' knob read fell back to default: {}",
                        self.definition.id, e
                    );
                }
                default
            }
        }
    }

    pub fn knobs(&self) -> &'a KnobSettings {
        self.knobs.current()
    }

    /// True when an analysis executor is attached.
    pub fn can_analyze(&self) -> bool {
        self.executor.is_some()
    }

    /// Run an analysis now and return its output.
    ///
    /// On `Err` the caller is expected to substitute its own fallback and
    /// call [`record_fallback`](Self::record_fallback).
    pub async fn analyze(
        &mut self,
        template_id: &str,
        variables: Payload,
        priority: Priority,
    ) -> Result<Value, AnalysisError> {
        let templates = self.templates;
        let template = templates.describe(template_id)?;
        let request = self.request(template, variables, priority);
        self.metrics.analyses_requested += 1;

        let Some(executor) = self.executor else {
            self.metrics.analyses_failed += 1;
            return Err(AnalysisError::NoExecutor);
        };

        self.metrics.memory_bytes += template.memory_bytes;
        match call_executor(executor, template, &request).await {
            Ok(outcome) => {
                self.count(&outcome);
                Ok(outcome.output)
            }
            Err(e) => {
                self.metrics.cache_misses += 1;
                self.metrics.analyses_failed += 1;
                Err(e)
            }
        }
    }

    /// Defer an analysis until domain logic has returned. Its output lands in
    /// `system_outputs.analysis.<template_id>`, or `fallback` if it fails.
    pub fn queue_analysis(
        &mut self,
        template_id: &str,
        variables: Payload,
        priority: Priority,
        fallback: Value,
    ) -> Result<(), TemplateNotFound> {
        let templates = self.templates;
        let template = templates.describe(template_id)?;
        let request = self.request(template, variables, priority);

        debug!("Queued analysis '{}' for '{}'", template_id, self.definition.id);
        self.queued.push(QueuedAnalysis {
            template: template.clone(),
            request,
            fallback,
        });
        Ok(())
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// Note that a deterministic fallback value was used.
    pub fn record_fallback(&mut self) {
        self.metrics.fallbacks_used += 1;
    }

    /// Resolve every queued analysis, in queue order.
    pub(crate) async fn process_queued(&mut self) -> Payload {
        let mut results = Payload::new();

        for queued in std::mem::take(&mut self.queued) {
            let template_id = queued.template.id.clone();
            self.metrics.analyses_requested += 1;

            let reply = match self.executor {
                Some(executor) => {
                    self.metrics.memory_bytes += queued.template.memory_bytes;
                    call_executor(executor, &queued.template, &queued.request).await
                }
                None => Err(AnalysisError::NoExecutor),
            };

            match reply {
                Ok(outcome) => {
                    self.count(&outcome);
                    results.insert(template_id, outcome.output);
                }
                Err(e) => {
                    warn!(
                        "Analysis '{}' for '{}' failed, using fallback: {}",
                        template_id, self.definition.id, e
                    );
                    if !matches!(e, AnalysisError::NoExecutor) {
                        self.metrics.cache_misses += 1;
                    }
                    self.metrics.analyses_failed += 1;
                    self.metrics.fallbacks_used += 1;
                    results.insert(template_id, queued.fallback);
                }
            }
        }

        results
    }

    pub(crate) fn into_metrics(self) -> ExecutionMetrics {
        self.metrics
    }

    fn request(
        &self,
        template: &AptTemplate,
        variables: Payload,
        priority: Priority,
    ) -> AnalysisRequest {
        AnalysisRequest {
            template_id: template.id.clone(),
            variables: merge_variables(self.knobs.to_json_map(), variables, &self.definition.id),
            execution_id: self.context.execution_id.clone(),
            system_id: self.definition.id.clone(),
            civilization_id: self.context.civilization.as_ref().map(|c| c.id.clone()),
            trigger: self.context.trigger,
            priority,
        }
    }

    fn count(&mut self, outcome: &AnalysisOutcome) {
        if outcome.cache_hit {
            self.metrics.cache_hits += 1;
        } else {
            self.metrics.cache_misses += 1;
        }
        self.metrics.retries += outcome.retries;
    }
}

fn is_absent(err: &ConfigurationError) -> bool {
    matches!(
        err,
        ConfigurationError::Unset(_) | ConfigurationError::MissingRequired(_)
    )
}

/// Run one analysis, turning an executor panic into a backend error.
async fn call_executor(
    executor: &dyn AnalysisExecutor,
    template: &AptTemplate,
    request: &AnalysisRequest,
) -> Result<AnalysisOutcome, AnalysisError> {
    match AssertUnwindSafe(executor.execute(template, request))
        .catch_unwind()
        .await
    {
        Ok(reply) => reply,
        Err(panic) => Err(AnalysisError::Backend(format!(
            "executor panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}
