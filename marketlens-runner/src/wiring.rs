//! Configuration → live components.
//!
//! This is the only place where a source *name* from `[[routes]]` becomes an
//! instance. Each provider gets one HTTP client, built here and shared by every
//! segment routed to it.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use marketlens_core::analysis::modules::builtin;
use marketlens_core::analysis::{AnalysisEngine, AnalysisModuleRegistry, EngineError, SummaryRules};
use marketlens_core::cache::{CacheError, CacheStore, FileStore};
use marketlens_core::config::{AppConfig, CacheBackend, CacheConfig};
use marketlens_core::data::http::build_client;
use marketlens_core::data::{
    BinanceSource, CircuitBreaker, DataSource, DataSourceManager, DataSourceRegistry, EastmoneySource,
    QuotaTracker, SourceError, TushareSource, YahooSource,
};
use marketlens_core::domain::MarketSegment;
use marketlens_core::fallback::{DateFallbackFetcher, TradeDateLookup};

use crate::service::DatasetSource;

/// Errors while turning configuration into components. All of them are fatal.
#[derive(Debug, Error)]
pub enum WiringError {
    #[error("route for segment {segment} names unknown source '{name}'")]
    UnknownSource { segment: MarketSegment, name: String },

    #[error("failed to set up source '{name}': {error}")]
    Source { name: String, error: SourceError },

    #[error("unknown analysis module '{0}'")]
    UnknownModule(String),

    #[error("cache setup failed: {0}")]
    Cache(#[from] CacheError),

    #[error("analysis modules: {0}")]
    Engine(#[from] EngineError),
}

/// Everything a request needs, built once at startup.
pub struct Components {
    pub manager: DataSourceManager,
    pub cache: CacheStore,
    pub fallback: DateFallbackFetcher,
    /// Upstream for the date-fallback datasets, if any source provides them.
    pub datasets: Option<Arc<dyn DatasetSource>>,
    pub engine: AnalysisEngine,
    pub rules: SummaryRules,
}

impl std::fmt::Debug for Components {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Components")
            .field("segments", &self.manager.registry().segments())
            .field("modules", &self.engine.order())
            .field("has_datasets", &self.datasets.is_some())
            .finish()
    }
}

/// Instances for every source named in the routes, by name.
#[derive(Default)]
pub struct SourceSet {
    pub by_name: BTreeMap<String, Arc<dyn DataSource>>,
    /// Kept typed for its extra roles (trading calendar, per-session datasets).
    pub tushare: Option<Arc<TushareSource>>,
}

impl std::fmt::Debug for SourceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSet")
            .field("sources", &self.by_name.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub fn wire(config: &AppConfig) -> Result<Components, WiringError> {
    let sources = build_sources(config)?;
    let registry = build_registry(config, &sources)?;
    let cache = build_cache(&config.cache)?;

    let lookup = sources
        .tushare
        .as_ref()
        .map(|t| Arc::clone(t) as Arc<dyn TradeDateLookup>);
    if lookup.is_none() {
        warn!("no trading-calendar source configured; latest trading date falls back to today");
    }
    let fallback = DateFallbackFetcher::new(cache.clone(), lookup)
        .with_max_attempts(config.fallback.max_attempts)
        .with_trade_date_ttl(std::time::Duration::from_secs(config.fallback.trade_date_ttl_secs));

    let engine = build_engine(config)?;
    info!(
        segments = registry.segments().len(),
        modules = ?engine.order(),
        "components wired"
    );

    Ok(Components {
        manager: DataSourceManager::new(Arc::new(registry)),
        cache,
        fallback,
        datasets: sources.tushare.map(|t| t as Arc<dyn DatasetSource>),
        engine,
        rules: SummaryRules::new(config.summary_rules.clone()),
    })
}

pub fn build_cache(cfg: &CacheConfig) -> Result<CacheStore, CacheError> {
    match cfg.backend {
        CacheBackend::Memory => Ok(CacheStore::in_memory()),
        CacheBackend::File => {
            let store = FileStore::new(&cfg.dir)?;
            info!(dir = %cfg.dir.display(), "file cache backend");
            Ok(CacheStore::new(Arc::new(store)))
        }
    }
}

/// One instance per distinct source name in the routes.
pub fn build_sources(config: &AppConfig) -> Result<SourceSet, WiringError> {
    let timeout = config.fetch.request_timeout();
    let mut set = SourceSet::default();

    for route in &config.routes {
        if set.by_name.contains_key(&route.source) {
            continue;
        }
        let name = route.source.as_str();
        let settings = config.source(name);
        let retry_override = settings.retry_override();
        let client = build_client(timeout).map_err(|error| WiringError::Source {
            name: name.to_string(),
            error,
        })?;

        let source: Arc<dyn DataSource> = match name {
            TushareSource::NAME => {
                let token = settings.token.clone().unwrap_or_default();
                if token.is_empty() {
                    warn!("tushare has no token; its calls will fail and fall through");
                }
                let quota = QuotaTracker::new(name, settings.daily_quota, settings.low_quota_threshold());
                let retry = TushareSource::default_retry().apply(&retry_override);
                let tushare = Arc::new(TushareSource::new(client, token, quota, retry).with_timeout(timeout));
                set.tushare = Some(Arc::clone(&tushare));
                tushare
            }
            EastmoneySource::NAME => {
                let retry = EastmoneySource::default_retry().apply(&retry_override);
                Arc::new(EastmoneySource::new(client, retry).with_timeout(timeout))
            }
            YahooSource::NAME => {
                let retry = YahooSource::default_retry().apply(&retry_override);
                let breaker = Arc::new(CircuitBreaker::default_provider());
                Arc::new(YahooSource::new(client, breaker, retry).with_timeout(timeout))
            }
            BinanceSource::NAME => {
                let retry = BinanceSource::default_retry().apply(&retry_override);
                Arc::new(BinanceSource::new(client, retry).with_timeout(timeout))
            }
            _ => {
                return Err(WiringError::UnknownSource {
                    segment: route.segment,
                    name: route.source.clone(),
                })
            }
        };
        set.by_name.insert(route.source.clone(), source);
    }
    Ok(set)
}

pub fn build_registry(config: &AppConfig, sources: &SourceSet) -> Result<DataSourceRegistry, WiringError> {
    let mut registry = DataSourceRegistry::new();
    for route in &config.routes {
        let source = sources
            .by_name
            .get(&route.source)
            .ok_or_else(|| WiringError::UnknownSource {
                segment: route.segment,
                name: route.source.clone(),
            })?;
        registry.register(route.segment, Arc::clone(source), route.priority);
    }
    Ok(registry)
}

/// Enabled modules from the merged settings, not yet resolved.
pub fn module_registry(config: &AppConfig) -> Result<AnalysisModuleRegistry, WiringError> {
    let mut registry = AnalysisModuleRegistry::new();
    for (name, settings) in config.module_settings() {
        if !settings.enabled {
            info!(module = %name, "analysis module disabled");
            continue;
        }
        let module = builtin(&name).ok_or_else(|| WiringError::UnknownModule(name.clone()))?;
        registry.register(module, settings.priority, settings.dependencies);
    }
    Ok(registry)
}

/// Resolves the module order; a cycle or missing dependency stops startup.
pub fn build_engine(config: &AppConfig) -> Result<AnalysisEngine, WiringError> {
    Ok(AnalysisEngine::from_registry(&module_registry(config)?)?)
}
