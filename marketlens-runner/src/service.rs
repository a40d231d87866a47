//! Request orchestration: one analysis request from symbol to report.
//!
//! `analyze` resolves the latest trading date, launches every fetch the
//! modules need at once, joins them (under the configured caller timeout),
//! and hands the assembled input to the engine. Only a daily-bar exhaustion,
//! an engine fault or the timeout reaches the caller; optional datasets that
//! fail are logged and left empty.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, info, warn};

use marketlens_core::analysis::{AnalysisEngine, AnalysisInput, EngineError, SummaryRules};
use marketlens_core::cache::CacheStore;
use marketlens_core::config::{AppConfig, SegmentConfig};
use marketlens_core::data::{DataSourceManager, FetchError, SourceError, TushareSource};
use marketlens_core::domain::{FetchRequest, MarketSegment, Operation, Table};
use marketlens_core::fallback::DateFallbackFetcher;

use crate::batch::{fetch_batched, BatchProgress, BatchSummary};
use crate::report::AnalysisReport;
use crate::wiring::{wire, Components, WiringError};

/// Errors that reach the caller of `analyze`.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("analysis of {symbol} timed out after {secs}s")]
    Timeout { symbol: String, secs: u64 },
}

/// Upstream for per-session, market-wide datasets fetched through the date
/// fallback.
#[async_trait]
pub trait DatasetSource: Send + Sync {
    /// Whether the datasets describe instruments of `segment`.
    fn serves(&self, segment: MarketSegment) -> bool;

    async fn dataset(&self, name: &str, date: NaiveDate) -> Result<Table, SourceError>;
}

#[async_trait]
impl DatasetSource for TushareSource {
    fn serves(&self, segment: MarketSegment) -> bool {
        segment == MarketSegment::AShare
    }

    async fn dataset(&self, name: &str, date: NaiveDate) -> Result<Table, SourceError> {
        self.trade_date_dataset(name, date).await
    }
}

/// Everything fetched for one request, before it becomes an `AnalysisInput`.
struct Gathered {
    daily: Table,
    fundamentals: Table,
    moneyflow: Table,
    spot: Table,
    datasets: BTreeMap<String, Table>,
}

pub struct AnalysisService {
    config: Arc<AppConfig>,
    manager: DataSourceManager,
    cache: CacheStore,
    fallback: DateFallbackFetcher,
    datasets: Option<Arc<dyn DatasetSource>>,
    engine: AnalysisEngine,
    rules: SummaryRules,
}

impl std::fmt::Debug for AnalysisService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisService")
            .field("modules", &self.engine.order())
            .field("cache", &self.cache)
            .finish()
    }
}

impl AnalysisService {
    pub fn new(config: AppConfig, components: Components) -> Self {
        Self {
            config: Arc::new(config),
            manager: components.manager,
            cache: components.cache,
            fallback: components.fallback,
            datasets: components.datasets,
            engine: components.engine,
            rules: components.rules,
        }
    }

    pub fn from_config(config: AppConfig) -> Result<Self, WiringError> {
        let components = wire(&config)?;
        Ok(Self::new(config, components))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn engine(&self) -> &AnalysisEngine {
        &self.engine
    }

    pub async fn analyze(&self, symbol: &str, segment: MarketSegment) -> Result<AnalysisReport, RunError> {
        self.analyze_with(symbol, segment, BTreeMap::new()).await
    }

    /// `extra` carries request parameters such as `industry`.
    pub async fn analyze_with(
        &self,
        symbol: &str,
        segment: MarketSegment,
        extra: BTreeMap<String, String>,
    ) -> Result<AnalysisReport, RunError> {
        let settings = self.config.segment(segment);
        let as_of = self.fallback.latest_trade_date().await;
        info!(symbol, segment = %segment, as_of = %as_of, "analysis started");

        let gather = self.gather(symbol, segment, as_of, &settings);
        let gathered = match self.config.fetch.run_timeout() {
            Some(limit) => tokio::time::timeout(limit, gather).await.map_err(|_| RunError::Timeout {
                symbol: symbol.to_string(),
                secs: limit.as_secs(),
            })??,
            None => gather.await?,
        };

        let mut input = AnalysisInput::new(symbol, segment, as_of).with_daily(gathered.daily);
        input.params = settings.indicators;
        input.fundamentals = gathered.fundamentals;
        input.moneyflow = gathered.moneyflow;
        input.spot = gathered.spot;
        input.datasets = gathered.datasets;
        input.extra = extra;
        let input = Arc::new(input);

        let bundle = self.engine.run(Arc::clone(&input)).await?;
        if !bundle.is_complete() {
            warn!(symbol, faults = bundle.faults.len(), "analysis incomplete");
        }
        let report = AnalysisReport::new(&input, bundle, &self.rules);
        info!(symbol, summary = %report.summary_phrase, "analysis finished");
        Ok(report)
    }

    /// Fan-out/fan-in of every fetch one request needs.
    async fn gather(
        &self,
        symbol: &str,
        segment: MarketSegment,
        as_of: NaiveDate,
        settings: &SegmentConfig,
    ) -> Result<Gathered, FetchError> {
        let start = as_of - ChronoDuration::days(i64::from(settings.data_days));
        let ranged = |op: Operation| FetchRequest::single(op, segment, symbol).with_range(Some(start), Some(as_of));

        let daily = self.cached_fetch(
            ranged(Operation::Daily),
            Duration::from_secs(settings.daily_ttl_secs),
            Some(as_of),
        );
        let fundamentals = self.optional(self.cached_fetch(
            FetchRequest::single(Operation::Fundamentals, segment, symbol),
            Duration::from_secs(settings.fundamentals_ttl_secs),
            None,
        ));
        let moneyflow = self.optional(self.cached_fetch(
            ranged(Operation::Moneyflow),
            Duration::from_secs(settings.moneyflow_ttl_secs),
            Some(as_of),
        ));
        let spot = self.optional(async {
            let req = FetchRequest::single(Operation::Spot, segment, symbol);
            self.manager.fetch(&req).await.map(|out| out.into_table())
        });
        let datasets = self.fallback_datasets(segment);

        let (daily, fundamentals, moneyflow, spot, datasets) =
            tokio::join!(daily, fundamentals, moneyflow, spot, datasets);
        Ok(Gathered {
            daily: daily?.between(start, as_of),
            fundamentals,
            moneyflow: moneyflow.between(start, as_of),
            spot,
            datasets,
        })
    }

    async fn optional(&self, fetch: impl std::future::Future<Output = Result<Table, FetchError>>) -> Table {
        match fetch.await {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "optional dataset unavailable, continuing without it");
                Table::new()
            }
        }
    }

    /// Read-through cache under `<operation>:<SEG>:<symbol>`.
    ///
    /// With `fresh_as_of`, a cached table is served only if it reaches that
    /// date; otherwise only the missing tail is requested and merged into the
    /// cached rows. A failed refresh falls back to the stale rows if any.
    async fn cached_fetch(
        &self,
        req: FetchRequest,
        ttl: Duration,
        fresh_as_of: Option<NaiveDate>,
    ) -> Result<Table, FetchError> {
        let key = cache_key(&req);
        let cached = self.cache.read_rows(&key).await;

        let mut req = req;
        if let Some(t) = &cached {
            let last = t.last_date();
            match fresh_as_of {
                Some(as_of) if !last.is_some_and(|d| d >= as_of) => {
                    if let (Some(last), Some(start)) = (last, req.start) {
                        if last >= start {
                            let from = last + ChronoDuration::days(1);
                            debug!(key = %key, from = %from, "fetching missing tail");
                            let end = req.end;
                            req = req.with_range(Some(from), end);
                        }
                    }
                }
                _ => {
                    debug!(key = %key, rows = t.len(), "served from cache");
                    return Ok(t.clone());
                }
            }
        }

        match self.manager.fetch(&req).await {
            Ok(out) => {
                let fetched = out.into_table();
                if let Some(stored) = self.cache.upsert_rows(&key, &fetched, ttl).await {
                    return Ok(stored);
                }
                let mut merged = cached.unwrap_or_default();
                merged.append(fetched);
                Ok(merged)
            }
            Err(e) => match cached {
                Some(stale) => {
                    warn!(key = %key, error = %e, "refresh failed, serving cached rows");
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    /// Every configured date-fallback dataset, in parallel; failures leave an
    /// empty table.
    async fn fallback_datasets(&self, segment: MarketSegment) -> BTreeMap<String, Table> {
        let Some(source) = self.datasets.as_deref().filter(|s| s.serves(segment)) else {
            return BTreeMap::new();
        };
        let fetches = self.config.datasets.iter().map(|spec| async move {
            let name = spec.name.as_str();
            let table = self
                .fallback
                .get_or_fetch(spec, move |date| source.dataset(name, date))
                .await;
            (spec.name.clone(), table)
        });
        join_all(fetches).await.into_iter().collect()
    }

    /// Batched multi-symbol fetch with the configured batch size and pause.
    /// Successful date-keyed results are written through to the cache.
    pub async fn fetch_many(
        &self,
        template: &FetchRequest,
        progress: Option<&dyn BatchProgress>,
    ) -> BatchSummary {
        let fetch = &self.config.fetch;
        let summary = fetch_batched(&self.manager, template, fetch.batch_size, fetch.batch_pause(), progress).await;

        if let Some(ttl) = self.ttl_for(template.operation, template.segment) {
            for outcome in &summary.outcomes {
                if let Ok(table) = &outcome.result {
                    let req = FetchRequest::single(template.operation, template.segment, outcome.symbol.clone());
                    self.cache.write_rows(&cache_key(&req), table, ttl).await;
                }
            }
        }
        summary
    }

    fn ttl_for(&self, operation: Operation, segment: MarketSegment) -> Option<Duration> {
        let settings = self.config.segment(segment);
        let secs = match operation {
            Operation::Daily => settings.daily_ttl_secs,
            Operation::Fundamentals => settings.fundamentals_ttl_secs,
            Operation::Moneyflow => settings.moneyflow_ttl_secs,
            Operation::Spot => return None,
        };
        Some(Duration::from_secs(secs))
    }
}

/// `<operation>:<SEG>:<symbol>`, e.g. `daily:A:600519`.
pub fn cache_key(req: &FetchRequest) -> String {
    format!(
        "{}:{}:{}",
        req.operation,
        req.segment.code(),
        req.symbol().unwrap_or_default()
    )
}
