//! SimTick - orchestration core for pluggable simulation subsystems.
//!
//! A subsystem declares a [`SystemDefinition`](models::SystemDefinition),
//! registers its knobs and analysis templates, and implements
//! [`Subsystem::execute_system`](system::Subsystem::execute_system). A
//! [`SystemRuntime`](system::SystemRuntime) wraps it with the shared
//! lifecycle: context validation, knob application, domain execution,
//! queued analyses, result assembly, and history tracking.
//!
//! The [`harness`] module is a reference scheduler that drives runtimes
//! tick by tick.

pub mod analysis;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod harness;
pub mod health;
pub mod knobs;
pub mod models;
pub mod report;
pub mod schedule;
pub mod system;
pub mod systems;

pub use error::{ErrorKind, OrchestrationError};
pub use models::{ExecutionContext, ExecutionResult, SystemDefinition};
pub use system::{DomainOutput, DomainScope, RuntimeOptions, Subsystem, SystemRuntime};
