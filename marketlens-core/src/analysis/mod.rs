//! Dependency-ordered analysis pipeline.
//!
//! - `module`: the `AnalysisModule` contract and its input/context/output types.
//! - `registry`: registration plus depth-first topological resolution.
//! - `engine`: runs the resolved order, isolating module failures.
//! - `bundle`: the aggregated `ResultBundle`.
//! - `summary`: typed rules that turn a bundle into one phrase.
//! - `modules`: the built-in analyzers.

pub mod bundle;
pub mod engine;
pub mod module;
pub mod modules;
pub mod registry;
pub mod summary;

pub use bundle::{CompletenessFault, ResultBundle};
pub use engine::{AnalysisEngine, EngineError};
pub use module::{
    json_number, AnalysisContext, AnalysisError, AnalysisInput, AnalysisModule, IndicatorParams, ModuleOutput,
};
pub use registry::{AnalysisModuleRegistry, ModuleDescriptor, RegistryError, ResolvedModule};
pub use summary::{CompareOp, Condition, Operand, SummaryRule, SummaryRules, DEFAULT_PHRASE};
