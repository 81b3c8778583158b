//! When and in what order subsystems run.

pub mod gate;
pub mod plan;

pub use gate::{should_execute, GateState};
pub use plan::{ExecutionPhase, ExecutionPlan};
