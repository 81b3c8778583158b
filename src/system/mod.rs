//! The subsystem extension point and the runtime that drives it.

pub mod runtime;
pub mod scope;

pub use runtime::{RuntimeOptions, SystemRuntime};
pub use scope::DomainScope;

use crate::analysis::TemplateRegistry;
use crate::knobs::KnobRegistry;
use crate::models::{ExecutionContext, GameEvent, Payload, ScheduledAction, SystemDefinition};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What domain logic hands back to the lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainOutput {
    pub game_state_updates: Payload,
    pub system_outputs: Payload,
    pub events_generated: Vec<GameEvent>,
    pub scheduled_actions: Vec<ScheduledAction>,
}

/// A concrete simulation subsystem.
///
/// Implementors provide metadata, knobs, analysis templates and the domain
/// logic. Validation, knob application, analysis resolution, metrics and
/// history are handled by [`SystemRuntime`].
#[async_trait]
pub trait Subsystem: Send {
    fn definition(&self) -> SystemDefinition;

    /// Register knob definitions. Called once when the runtime is built.
    fn initialize_knobs(&self, knobs: &mut KnobRegistry);

    /// Register analysis templates. Called once when the runtime is built.
    fn initialize_templates(&self, templates: &mut TemplateRegistry);

    async fn execute_system(&mut self, scope: &mut DomainScope<'_>) -> anyhow::Result<DomainOutput>;

    /// Used by event-driven scheduling.
    fn is_relevant_event(&self, _event: &GameEvent, _context: &ExecutionContext) -> bool {
        false
    }
}
