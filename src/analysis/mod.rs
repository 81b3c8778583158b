//! Analysis templates and the executor seam.
//!
//! Subsystems register [`AptTemplate`]s at construction; the lifecycle turns
//! template references into [`AnalysisRequest`]s for an [`AnalysisExecutor`].

pub mod executor;
pub mod ollama;
pub mod template;

pub use executor::{merge_variables, AnalysisExecutor, AnalysisOutcome, AnalysisRequest};
pub use ollama::OllamaExecutor;
pub use template::{AptTemplate, Complexity, OutputFormat, TemplateRegistry};
