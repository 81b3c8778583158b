//! Typed, validated runtime parameters ("knobs").

pub mod definition;
pub mod registry;

pub use definition::{KnobDefinition, KnobKind, KnobValue};
pub use registry::{FromKnob, KnobChange, KnobRegistry, KnobSettings, ValidationReport};
