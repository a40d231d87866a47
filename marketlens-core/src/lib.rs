//! MarketLens Core — data retrieval with provider fallback, incremental caching and
//! a dependency-ordered analysis pipeline.
//!
//! This crate contains:
//! - Domain types (market segments, fetch requests, tables of typed rows)
//! - The `DataSource` capability, four upstream variants and standardization helpers
//! - `DataSourceRegistry` / `DataSourceManager` with sequential priority fallback
//! - `CacheStore`: per-row hash fields under one TTL, memory and file backends
//! - `DateFallbackFetcher` for "latest trading date" datasets
//! - Indicator math, the `AnalysisModule` contract, registry, engine and built-ins
//! - Typed summary rules and the application configuration model

pub mod analysis;
pub mod cache;
pub mod config;
pub mod data;
pub mod domain;
pub mod fallback;
pub mod indicators;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything shared across tasks is Send + Sync.
    ///
    /// Registries, the cache and the engine are held process-wide and used from
    /// tokio tasks and rayon workers at once.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::MarketSegment>();
        require_sync::<domain::MarketSegment>();
        require_send::<domain::FetchRequest>();
        require_sync::<domain::FetchRequest>();
        require_send::<domain::Table>();
        require_sync::<domain::Table>();

        // Data layer
        require_send::<data::DataSourceRegistry>();
        require_sync::<data::DataSourceRegistry>();
        require_send::<data::DataSourceManager>();
        require_sync::<data::DataSourceManager>();
        require_send::<data::FetchOutput>();
        require_sync::<data::FetchOutput>();
        require_send::<data::TushareSource>();
        require_sync::<data::TushareSource>();
        require_send::<data::CircuitBreaker>();
        require_sync::<data::CircuitBreaker>();
        require_send::<data::QuotaTracker>();
        require_sync::<data::QuotaTracker>();

        // Cache
        require_send::<cache::CacheStore>();
        require_sync::<cache::CacheStore>();
        require_send::<fallback::DateFallbackFetcher>();
        require_sync::<fallback::DateFallbackFetcher>();

        // Analysis
        require_send::<analysis::AnalysisModuleRegistry>();
        require_sync::<analysis::AnalysisModuleRegistry>();
        require_send::<analysis::AnalysisEngine>();
        require_sync::<analysis::AnalysisEngine>();
        require_send::<analysis::AnalysisInput>();
        require_sync::<analysis::AnalysisInput>();
        require_send::<analysis::ResultBundle>();
        require_sync::<analysis::ResultBundle>();

        // Configuration
        require_send::<config::AppConfig>();
        require_sync::<config::AppConfig>();
    }

    /// Architecture contract: analysis modules receive no I/O handles.
    ///
    /// `analyze()` sees only the input snapshot and earlier modules' outputs,
    /// so it is safe to run on a rayon worker.
    #[test]
    fn analysis_module_trait_takes_only_input_and_context() {
        fn _check_trait_object_builds(
            module: &dyn analysis::AnalysisModule,
            input: &analysis::AnalysisInput,
            ctx: &analysis::AnalysisContext,
        ) -> Result<analysis::ModuleOutput, analysis::AnalysisError> {
            module.analyze(input, ctx)
        }
    }
}
