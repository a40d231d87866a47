//! MarketLens Runner — request orchestration on top of `marketlens-core`.
//!
//! This crate provides:
//! - Wiring from configuration into source, module and cache instances
//! - `AnalysisService`: concurrent fetches, read-through cache, engine run
//! - Batched multi-symbol fetches with an inter-batch pause
//! - Report assembly with summary phrase and fingerprint
//! - JSON/CSV export

pub mod batch;
pub mod export;
pub mod report;
pub mod service;
pub mod wiring;

pub use batch::{fetch_batched, BatchProgress, BatchSummary, SymbolOutcome};
pub use export::{export_json, factors_csv, save_report, save_table, table_csv, ExportError};
pub use report::{AnalysisReport, SCHEMA_VERSION};
pub use service::{cache_key, AnalysisService, DatasetSource, RunError};
pub use wiring::{build_cache, build_engine, module_registry, wire, Components, WiringError};
